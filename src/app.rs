use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::net;
use teloxide::prelude::*;
use tracing::info;

use crate::bot;
use crate::bot::AppContext;
use crate::bot::DialogueStorage;
use crate::bot::flow::Flow;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::movies::OmdbClient;
use crate::transfer::HttpFetcher;
use crate::transfer::clear_stale_downloads;

const API_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A bot whose HTTP client waits up to `timeout` per request instead of
/// teloxide's default, which is too short for large documents.
pub fn build_bot(token: &str, timeout: Duration) -> anyhow::Result<Bot> {
  let client = net::default_reqwest_settings()
    .timeout(timeout)
    .build()
    .context("failed to build telegram client")?;
  Ok(Bot::with_client(token, client))
}

pub struct App {
  bot: Bot,
  context: Arc<AppContext>,
  handler: UpdateHandler<anyhow::Error>,
  download_dir: PathBuf,
}

impl App {
  pub fn new(bot: Bot, config: Config) -> anyhow::Result<Self> {
    let api_http = reqwest::Client::builder()
      .timeout(API_TIMEOUT)
      .build()
      .context("failed to build movie api client")?;
    // No overall timeout here; downloads are bounded by size instead.
    let download_http = reqwest::Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .build()
      .context("failed to build download client")?;
    let movies = OmdbClient::new(api_http, config.omdb_base_url, config.omdb_api_key);
    let files = HttpFetcher::new(download_http, config.download_dir.clone(), config.max_upload_bytes);
    let flow = Flow::new(
      Arc::new(movies),
      Arc::new(files),
      Arc::new(SystemClock),
      config.cancel_policy,
    );
    let context = Arc::new(AppContext::new(flow));
    let handler = bot::build_schema();
    Ok(Self {
      bot,
      context,
      handler,
      download_dir: config.download_dir,
    })
  }

  pub async fn run(self) -> anyhow::Result<()> {
    let removed = clear_stale_downloads(&self.download_dir)
      .await
      .with_context(|| format!("failed to clean download dir {}", self.download_dir.display()))?;
    if removed > 0 {
      info!(removed, dir = %self.download_dir.display(), "removed downloads left by a previous run");
    }

    let storage: Arc<DialogueStorage> = InMemStorage::new();

    let me = self.bot.get_me().await?;

    Dispatcher::builder(self.bot.clone(), self.handler)
      .dependencies(dptree::deps![self.context.clone(), storage.clone(), me])
      .enable_ctrlc_handler()
      .build()
      .dispatch()
      .await;

    Ok(())
  }
}
