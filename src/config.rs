use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;

const DEFAULT_OMDB_BASE_URL: &str = "https://www.omdbapi.com/";
/// Bot API ceiling for documents sent by bots.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_OAUTH_TIMEOUT: Duration = Duration::from_secs(300);
/// Floor for every Bot API request, long polling included.
pub const BASE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Slowest upstream rate an upload is still expected to finish at.
const MIN_UPLOAD_BYTES_PER_SEC: u64 = 128 * 1024;

/// What the `cancel` button does with a downloaded file that is waiting for a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
  /// Finalize the upload with its original name.
  #[default]
  Send,
  /// Drop the downloaded file without sending it.
  Discard,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub omdb_api_key: String,
  pub omdb_base_url: String,
  pub download_dir: PathBuf,
  pub max_upload_bytes: u64,
  pub cancel_policy: CancelPolicy,
}

impl Config {
  /// Bot API request timeout long enough to push `max_upload_bytes` at the
  /// minimum expected rate.
  pub fn request_timeout(&self) -> Duration {
    upload_request_timeout(self.max_upload_bytes)
  }

  pub fn from_env() -> Result<Self> {
    load_dotenv();
    let bot_token = env::var("BOT_TOKEN")
      .or_else(|_| env::var("TELOXIDE_TOKEN"))
      .context("BOT_TOKEN or TELOXIDE_TOKEN must be set")?;
    let omdb_api_key = env::var("OMDB_API_KEY").context("OMDB_API_KEY must be set")?;
    let omdb_base_url = env::var("OMDB_BASE_URL").unwrap_or_else(|_| DEFAULT_OMDB_BASE_URL.to_string());
    let download_dir = env::var("DOWNLOAD_DIR")
      .map(PathBuf::from)
      .unwrap_or_else(|_| env::temp_dir().join("relay-bot"));
    let max_upload_bytes = parse_positive(
      "MAX_UPLOAD_BYTES",
      &env::var("MAX_UPLOAD_BYTES").unwrap_or_default(),
      DEFAULT_MAX_UPLOAD_BYTES,
    );
    let cancel_policy = parse_cancel_policy(&env::var("UPLOAD_CANCEL").unwrap_or_default());
    Ok(Self {
      bot_token,
      omdb_api_key,
      omdb_base_url,
      download_dir,
      max_upload_bytes,
      cancel_policy,
    })
  }
}

#[derive(Debug, Clone)]
pub struct BloggerConfig {
  pub bot_token: String,
  pub blog_id: String,
  pub client_secrets_path: PathBuf,
  pub token_path: PathBuf,
  pub oauth_timeout: Duration,
}

impl BloggerConfig {
  pub fn from_env() -> Result<Self> {
    load_dotenv();
    let bot_token = env::var("BLOGGER_BOT_TOKEN")
      .or_else(|_| env::var("BOT_TOKEN"))
      .context("BLOGGER_BOT_TOKEN or BOT_TOKEN must be set")?;
    let blog_id = env::var("BLOGGER_BLOG_ID").context("BLOGGER_BLOG_ID must be set")?;
    let client_secrets_path = env::var("GOOGLE_CLIENT_SECRETS")
      .map(PathBuf::from)
      .unwrap_or_else(|_| PathBuf::from("credentials.json"));
    let token_path = env::var("GOOGLE_TOKEN_PATH")
      .map(PathBuf::from)
      .unwrap_or_else(|_| PathBuf::from("token.json"));
    let oauth_timeout = Duration::from_secs(parse_positive(
      "OAUTH_TIMEOUT_SECS",
      &env::var("OAUTH_TIMEOUT_SECS").unwrap_or_default(),
      DEFAULT_OAUTH_TIMEOUT.as_secs(),
    ));
    Ok(Self {
      bot_token,
      blog_id,
      client_secrets_path,
      token_path,
      oauth_timeout,
    })
  }
}

pub fn upload_request_timeout(max_upload_bytes: u64) -> Duration {
  BASE_REQUEST_TIMEOUT + Duration::from_secs(max_upload_bytes.div_ceil(MIN_UPLOAD_BYTES_PER_SEC))
}

fn load_dotenv() {
  if let Err(err) = dotenv::dotenv()
    && !err.not_found()
  {
    tracing::warn!(error = %err, "failed to read .env file");
  }
}

fn parse_positive(name: &str, raw: &str, default: u64) -> u64 {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return default;
  }
  match trimmed.parse::<u64>() {
    Ok(value) if value > 0 => value,
    Ok(_) => {
      tracing::warn!(variable = name, "zero is not allowed, using default");
      default
    },
    Err(err) => {
      tracing::warn!(variable = name, value = trimmed, error = %err, "invalid number, using default");
      default
    },
  }
}

fn parse_cancel_policy(raw: &str) -> CancelPolicy {
  match raw.trim().to_ascii_lowercase().as_str() {
    "" | "send" => CancelPolicy::Send,
    "discard" => CancelPolicy::Discard,
    other => {
      tracing::warn!(value = other, "invalid UPLOAD_CANCEL entry, sending on cancel");
      CancelPolicy::Send
    },
  }
}
