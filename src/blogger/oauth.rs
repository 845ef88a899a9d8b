//! Google OAuth for an installed application: a loopback redirect listener,
//! code exchange, refresh, and a JSON credential file on disk.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use reqwest::Client;
use reqwest::Url;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

pub const BLOGGER_SCOPE: &str = "https://www.googleapis.com/auth/blogger";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_SKEW_SECS: i64 = 60;
const DONE_PAGE: &str = "<html><body>Authorization complete. You can close this window and return to Telegram.</body></html>";
const FAILED_PAGE: &str = "<html><body>Authorization failed. Return to Telegram for details.</body></html>";
const MISSING_CODE_PAGE: &str = "<html><body>No authorization code in this request.</body></html>";

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("failed to read client secrets {path}: {source}")]
  Secrets {
    path: String,
    #[source]
    source: io::Error,
  },
  #[error("client secrets are malformed: {0}")]
  MalformedSecrets(String),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error(transparent)]
  Http(#[from] reqwest::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("timed out waiting for the authorization redirect")]
  Timeout,
  #[error("authorization was denied: {0}")]
  Denied(String),
  #[error("authorization redirect carried an unexpected state")]
  StateMismatch,
  #[error("authorization listener stopped before the redirect arrived")]
  ListenerStopped,
  #[error("token endpoint rejected the request: {0}")]
  TokenEndpoint(String),
  #[error("stored credentials have no refresh token")]
  NoRefreshToken,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientSecrets {
  pub client_id: String,
  pub client_secret: String,
  #[serde(default = "default_auth_uri")]
  pub auth_uri: String,
  #[serde(default = "default_token_uri")]
  pub token_uri: String,
}

fn default_auth_uri() -> String {
  DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
  DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
  installed: Option<ClientSecrets>,
  web: Option<ClientSecrets>,
}

/// Accepts the JSON downloaded from the Google console, in either the
/// `installed` or `web` layout.
pub fn parse_client_secrets(raw: &str) -> Result<ClientSecrets, AuthError> {
  let file: SecretsFile = serde_json::from_str(raw).map_err(|err| AuthError::MalformedSecrets(err.to_string()))?;
  file
    .installed
    .or(file.web)
    .ok_or_else(|| AuthError::MalformedSecrets("expected an `installed` or `web` section".to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_at: DateTime<Utc>,
}

impl Credentials {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now + TimeDelta::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
  }

  fn from_token(token: TokenResponse, previous_refresh: Option<String>, now: DateTime<Utc>) -> Self {
    Self {
      access_token: token.access_token,
      refresh_token: token.refresh_token.or(previous_refresh),
      expires_at: now + TimeDelta::seconds(token.expires_in.unwrap_or(3600)),
    }
  }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  expires_in: Option<i64>,
  refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
  error: String,
  error_description: Option<String>,
}

pub fn authorization_url(secrets: &ClientSecrets, redirect_uri: &str, state: &str) -> Result<String, AuthError> {
  let mut url = Url::parse(&secrets.auth_uri).map_err(|err| AuthError::MalformedSecrets(err.to_string()))?;
  url
    .query_pairs_mut()
    .append_pair("client_id", &secrets.client_id)
    .append_pair("redirect_uri", redirect_uri)
    .append_pair("response_type", "code")
    .append_pair("scope", BLOGGER_SCOPE)
    .append_pair("access_type", "offline")
    .append_pair("prompt", "consent")
    .append_pair("state", state);
  Ok(url.into())
}

/// Query string of the redirect Google sends back to the loopback listener.
#[derive(Debug, Default, Deserialize)]
pub struct RedirectQuery {
  pub code: Option<String>,
  pub state: Option<String>,
  pub error: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Redirect {
  Code(String),
  /// A request without a code or an error, such as a reload of the bare URL.
  Ignored,
}

pub fn parse_redirect(query: &RedirectQuery, expected_state: &str) -> Result<Redirect, AuthError> {
  if let Some(error) = &query.error {
    return Err(AuthError::Denied(error.clone()));
  }
  match &query.code {
    Some(_) if query.state.as_deref() != Some(expected_state) => Err(AuthError::StateMismatch),
    Some(code) => Ok(Redirect::Code(code.clone())),
    None => Ok(Redirect::Ignored),
  }
}

struct RedirectListener {
  expected_state: String,
  result: Mutex<Option<oneshot::Sender<Result<String, AuthError>>>>,
}

async fn receive_redirect(
  State(listener): State<Arc<RedirectListener>>,
  Query(query): Query<RedirectQuery>,
) -> (StatusCode, Html<&'static str>) {
  let (result, response) = match parse_redirect(&query, &listener.expected_state) {
    Ok(Redirect::Code(code)) => (Ok(code), (StatusCode::OK, Html(DONE_PAGE))),
    Ok(Redirect::Ignored) => return (StatusCode::BAD_REQUEST, Html(MISSING_CODE_PAGE)),
    Err(err) => (Err(err), (StatusCode::BAD_REQUEST, Html(FAILED_PAGE))),
  };
  match listener.result.lock().await.take() {
    Some(sender) => {
      if sender.send(result).is_err() {
        debug!("oauth redirect arrived after the flow ended");
      }
    },
    None => debug!("ignoring repeated oauth redirect"),
  }
  response
}

pub struct GoogleAuth {
  http: Client,
  secrets_path: PathBuf,
  token_path: PathBuf,
  timeout: Duration,
}

/// A consent URL handed to the user plus the listener awaiting its redirect.
pub struct PendingAuthorization {
  listener: TcpListener,
  secrets: ClientSecrets,
  redirect_uri: String,
  state: String,
  url: String,
}

impl PendingAuthorization {
  pub fn authorization_url(&self) -> &str {
    &self.url
  }
}

impl GoogleAuth {
  pub fn new(http: Client, secrets_path: PathBuf, token_path: PathBuf, timeout: Duration) -> Self {
    Self {
      http,
      secrets_path,
      token_path,
      timeout,
    }
  }

  async fn secrets(&self) -> Result<ClientSecrets, AuthError> {
    let raw = tokio::fs::read_to_string(&self.secrets_path)
      .await
      .map_err(|source| AuthError::Secrets {
        path: self.secrets_path.display().to_string(),
        source,
      })?;
    parse_client_secrets(&raw)
  }

  pub async fn load_stored(&self) -> Result<Option<Credentials>, AuthError> {
    match tokio::fs::read(&self.token_path).await {
      Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err.into()),
    }
  }

  pub async fn store(&self, credentials: &Credentials) -> Result<(), AuthError> {
    if let Some(parent) = self.token_path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&self.token_path, serde_json::to_vec_pretty(credentials)?).await?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      tokio::fs::set_permissions(&self.token_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    debug!(path = %self.token_path.display(), "stored credentials");
    Ok(())
  }

  /// Returns the stored credentials when usable. Expired ones are refreshed
  /// once; `None` means the interactive flow is required.
  #[instrument(skip(self))]
  pub async fn restore(&self) -> Result<Option<Credentials>, AuthError> {
    let Some(stored) = self.load_stored().await? else {
      return Ok(None);
    };
    if !stored.is_expired(Utc::now()) {
      return Ok(Some(stored));
    }
    if stored.refresh_token.is_none() {
      return Ok(None);
    }
    match self.refresh(&stored).await {
      Ok(refreshed) => {
        self.store(&refreshed).await?;
        Ok(Some(refreshed))
      },
      Err(err) => {
        warn!(error = %err, "refreshing stored credentials failed");
        Ok(None)
      },
    }
  }

  /// Returns `credentials` unchanged while valid, otherwise refreshes and persists them.
  pub async fn fresh(&self, credentials: Credentials) -> Result<Credentials, AuthError> {
    if !credentials.is_expired(Utc::now()) {
      return Ok(credentials);
    }
    let refreshed = self.refresh(&credentials).await?;
    self.store(&refreshed).await?;
    Ok(refreshed)
  }

  #[instrument(skip(self, credentials))]
  pub async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, AuthError> {
    let refresh_token = credentials.refresh_token.as_deref().ok_or(AuthError::NoRefreshToken)?;
    let secrets = self.secrets().await?;
    let token = token_request(
      &self.http,
      &secrets.token_uri,
      &[
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
      ],
    )
    .await?;
    info!("refreshed access token");
    Ok(Credentials::from_token(token, credentials.refresh_token.clone(), Utc::now()))
  }

  /// Binds the loopback listener and builds the consent URL.
  pub async fn begin(&self) -> Result<PendingAuthorization, AuthError> {
    let secrets = self.secrets().await?;
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let state = uuid::Uuid::new_v4().simple().to_string();
    let url = authorization_url(&secrets, &redirect_uri, &state)?;
    info!(port, "waiting for oauth redirect");
    Ok(PendingAuthorization {
      listener,
      secrets,
      redirect_uri,
      state,
      url,
    })
  }

  /// Serves the redirect URI until the code arrives, then exchanges it and
  /// persists the result.
  pub async fn complete(&self, pending: PendingAuthorization) -> Result<Credentials, AuthError> {
    let PendingAuthorization {
      listener,
      secrets,
      redirect_uri,
      state,
      ..
    } = pending;
    let (sender, receiver) = oneshot::channel();
    let shared = Arc::new(RedirectListener {
      expected_state: state,
      result: Mutex::new(Some(sender)),
    });
    let router = Router::new().route("/", get(receive_redirect)).with_state(shared);

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
      let shutdown = async {
        let _ = stopped.await;
      };
      if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
        warn!(error = %err, "oauth redirect listener failed");
      }
    });

    let received = tokio::time::timeout(self.timeout, receiver).await;
    let _ = stop.send(());
    let code = match received {
      Err(_) => return Err(AuthError::Timeout),
      Ok(Err(_)) => return Err(AuthError::ListenerStopped),
      Ok(Ok(result)) => result?,
    };

    let token = token_request(
      &self.http,
      &secrets.token_uri,
      &[
        ("code", code.as_str()),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("redirect_uri", redirect_uri.as_str()),
        ("grant_type", "authorization_code"),
      ],
    )
    .await?;
    let credentials = Credentials::from_token(token, None, Utc::now());
    self.store(&credentials).await?;
    info!(has_refresh_token = credentials.refresh_token.is_some(), "authorization completed");
    Ok(credentials)
  }
}

async fn token_request(http: &Client, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
  let response = http.post(token_uri).form(params).send().await?;
  let status = response.status();
  let body = response.text().await?;
  if !status.is_success() {
    let detail = serde_json::from_str::<TokenErrorResponse>(&body)
      .map(|err| match err.error_description {
        Some(description) => format!("{}: {description}", err.error),
        None => err.error,
      })
      .unwrap_or(body);
    return Err(AuthError::TokenEndpoint(format!("{status}: {detail}")));
  }
  Ok(serde_json::from_str(&body)?)
}
