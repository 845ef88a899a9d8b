use anyhow::Result;
use relay_bot::blogger;
use relay_bot::config::BloggerConfig;
use relay_bot::telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init()?;
  let config = BloggerConfig::from_env()?;
  info!(
    blog_id = %config.blog_id,
    token_path = %config.token_path.display(),
    oauth_timeout_secs = config.oauth_timeout.as_secs(),
    "starting blogger bot"
  );
  blogger::run(config).await
}
