//! Second entry point: a bot that writes chat messages into a Blogger draft.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing::info;

use crate::app::build_bot;
use crate::blogger::oauth::GoogleAuth;
use crate::config::BASE_REQUEST_TIMEOUT;
use crate::config::BloggerConfig;

pub mod api;
pub mod commands;
pub mod handlers;
pub mod oauth;
pub mod state;

pub type BloggerStorage = InMemStorage<state::BloggerState>;

const API_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BloggerContext {
  auth: GoogleAuth,
  http: Client,
  blog_id: String,
}

impl BloggerContext {
  pub fn new(auth: GoogleAuth, http: Client, blog_id: String) -> Self {
    Self { auth, http, blog_id }
  }

  pub fn auth(&self) -> &GoogleAuth {
    &self.auth
  }

  pub fn http(&self) -> &Client {
    &self.http
  }

  pub fn blog_id(&self) -> &str {
    &self.blog_id
  }
}

pub async fn run(config: BloggerConfig) -> anyhow::Result<()> {
  let http = Client::builder()
    .timeout(API_TIMEOUT)
    .build()
    .context("failed to build blogger http client")?;
  let auth = GoogleAuth::new(
    http.clone(),
    config.client_secrets_path,
    config.token_path,
    config.oauth_timeout,
  );
  let context = Arc::new(BloggerContext::new(auth, http, config.blog_id));
  let storage: Arc<BloggerStorage> = InMemStorage::new();

  let bot = build_bot(&config.bot_token, BASE_REQUEST_TIMEOUT)?;
  let me = bot.get_me().await?;
  info!(username = ?me.username, "blogger bot connected");

  Dispatcher::builder(bot, handlers::build_schema())
    .dependencies(dptree::deps![context, storage, me])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

  Ok(())
}
