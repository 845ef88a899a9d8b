use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::Url;
use reqwest::header::CONTENT_DISPOSITION;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadBuf;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::util::infer_file_name;
use crate::util::rename_preserving_extension;

/// Prefix of every file `HttpFetcher` writes into the download directory.
const DOWNLOAD_PREFIX: &str = "upload-";

#[derive(Debug, Error)]
pub enum TransferError {
  #[error("not an http(s) url: {0}")]
  InvalidUrl(String),
  #[error(transparent)]
  Http(#[from] reqwest::Error),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("file exceeds {limit} bytes")]
  TooLarge { limit: u64 },
}

/// A downloaded file waiting to be sent to the conversation that fetched it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingUpload {
  pub path: PathBuf,
  pub original_name: String,
  pub custom_name: Option<String>,
  pub size: u64,
}

impl PendingUpload {
  pub fn new(path: PathBuf, original_name: impl Into<String>, size: u64) -> Self {
    Self {
      path,
      original_name: original_name.into(),
      custom_name: None,
      size,
    }
  }

  pub fn display_name(&self) -> &str {
    self.custom_name.as_deref().unwrap_or(&self.original_name)
  }

  /// Returns a copy carrying `new_stem` as its name, original extension kept.
  pub fn renamed(&self, new_stem: &str) -> Self {
    Self {
      custom_name: Some(rename_preserving_extension(&self.original_name, new_stem)),
      ..self.clone()
    }
  }

  /// Removes the local copy. Missing files are not an error.
  pub async fn release(&self) {
    match tokio::fs::remove_file(&self.path).await {
      Ok(()) => debug!(path = %self.path.display(), "released pending upload"),
      Err(err) if err.kind() == io::ErrorKind::NotFound => {},
      Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove pending upload"),
    }
  }
}

#[async_trait]
pub trait FileFetcher: Send + Sync {
  async fn fetch(&self, url: &str) -> Result<PendingUpload, TransferError>;
}

pub fn parse_download_url(raw: &str) -> Result<Url, TransferError> {
  let trimmed = raw.trim();
  let url = Url::parse(trimmed).map_err(|_| TransferError::InvalidUrl(trimmed.to_string()))?;
  match url.scheme() {
    "http" | "https" if url.host_str().is_some() => Ok(url),
    _ => Err(TransferError::InvalidUrl(trimmed.to_string())),
  }
}

#[derive(Clone)]
pub struct HttpFetcher {
  http: Client,
  download_dir: PathBuf,
  max_bytes: u64,
}

impl HttpFetcher {
  pub fn new(http: Client, download_dir: PathBuf, max_bytes: u64) -> Self {
    Self {
      http,
      download_dir,
      max_bytes,
    }
  }
}

#[async_trait]
impl FileFetcher for HttpFetcher {
  #[instrument(skip(self))]
  async fn fetch(&self, raw_url: &str) -> Result<PendingUpload, TransferError> {
    let url = parse_download_url(raw_url)?;
    let response = self.http.get(url.clone()).send().await?.error_for_status()?;

    if let Some(length) = response.content_length()
      && length > self.max_bytes
    {
      return Err(TransferError::TooLarge { limit: self.max_bytes });
    }

    let disposition = response
      .headers()
      .get(CONTENT_DISPOSITION)
      .and_then(|value| value.to_str().ok())
      .map(str::to_owned);
    let name = infer_file_name(&url, disposition.as_deref());

    tokio::fs::create_dir_all(&self.download_dir).await?;
    let (file, path) = tempfile::Builder::new()
      .prefix(DOWNLOAD_PREFIX)
      .tempfile_in(&self.download_dir)?
      .keep()
      .map_err(|err| err.error)?;
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
      let chunk = match chunk {
        Ok(chunk) => chunk,
        Err(err) => {
          discard(&path).await;
          return Err(err.into());
        },
      };
      written += chunk.len() as u64;
      if written > self.max_bytes {
        discard(&path).await;
        return Err(TransferError::TooLarge { limit: self.max_bytes });
      }
      if let Err(err) = file.write_all(&chunk).await {
        discard(&path).await;
        return Err(err.into());
      }
    }
    file.flush().await?;

    info!(url = %url, file_name = %name, bytes = written, "downloaded file");
    Ok(PendingUpload::new(path, name, written))
  }
}

/// Deletes downloads left behind by a previous run. Conversation state is not
/// persisted, so no pending upload can refer to them anymore. Other files in
/// the directory are left alone.
pub async fn clear_stale_downloads(dir: &Path) -> io::Result<usize> {
  let mut entries = match tokio::fs::read_dir(dir).await {
    Ok(entries) => entries,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
    Err(err) => return Err(err),
  };
  let mut removed = 0;
  while let Some(entry) = entries.next_entry().await? {
    let is_download = entry
      .file_name()
      .to_str()
      .is_some_and(|name| name.starts_with(DOWNLOAD_PREFIX));
    if !is_download || !entry.file_type().await?.is_file() {
      continue;
    }
    match tokio::fs::remove_file(entry.path()).await {
      Ok(()) => removed += 1,
      Err(err) => warn!(path = %entry.path().display(), error = %err, "failed to remove stale download"),
    }
  }
  Ok(removed)
}

async fn discard(path: &Path) {
  if let Err(err) = tokio::fs::remove_file(path).await {
    warn!(path = %path.display(), error = %err, "failed to remove partial download");
  }
}

/// Wraps a reader and publishes the running byte count on a watch channel.
pub struct ProgressReader<R> {
  inner: R,
  sent: u64,
  progress: watch::Sender<u64>,
}

impl<R> ProgressReader<R> {
  pub fn new(inner: R) -> (Self, watch::Receiver<u64>) {
    let (progress, receiver) = watch::channel(0);
    (
      Self {
        inner,
        sent: 0,
        progress,
      },
      receiver,
    )
  }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    let before = buf.filled().len();
    let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
    if let Poll::Ready(Ok(())) = &poll {
      let read = buf.filled().len() - before;
      if read > 0 {
        this.sent += read as u64;
        this.progress.send_replace(this.sent);
      }
    }
    poll
  }
}

pub fn percent(sent: u64, total: u64) -> u8 {
  if total == 0 {
    return 100;
  }
  ((sent.min(total) as u128 * 100) / total as u128) as u8
}

/// Tracks which quarter marks have been reported so each is announced once.
#[derive(Debug, Default)]
pub struct Milestones {
  last: u8,
}

impl Milestones {
  const STEP: u8 = 25;

  /// Returns the highest newly crossed mark, if any.
  pub fn advance(&mut self, percent: u8) -> Option<u8> {
    let mark = percent / Self::STEP * Self::STEP;
    if mark > self.last {
      self.last = mark;
      Some(mark)
    } else {
      None
    }
  }
}
