use anyhow::Result;
use relay_bot::app::App;
use relay_bot::app::build_bot;
use relay_bot::config::Config;
use relay_bot::telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init()?;
  let config = Config::from_env()?;
  info!(
    download_dir = %config.download_dir.display(),
    max_upload_bytes = config.max_upload_bytes,
    cancel_policy = ?config.cancel_policy,
    request_timeout_secs = config.request_timeout().as_secs(),
    "starting relay bot"
  );

  let bot = build_bot(&config.bot_token, config.request_timeout())?;
  let app = App::new(bot, config)?;
  app.run().await
}
