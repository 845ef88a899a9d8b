use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use teloxide::utils::markdown;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum MovieError {
  #[error(transparent)]
  Http(#[from] reqwest::Error),
  #[error("movie not found: {0}")]
  NotFound(String),
  #[error("movie api error: {0}")]
  Api(String),
}

/// One row of a title search, enough to render a selection button.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MovieSummary {
  #[serde(rename = "Title")]
  pub title: String,
  #[serde(rename = "Year")]
  pub year: String,
  #[serde(rename = "imdbID")]
  pub external_id: String,
}

impl MovieSummary {
  pub fn label(&self) -> String {
    format!("{} ({})", self.title, self.year)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MovieDetails {
  #[serde(rename = "Title")]
  pub title: String,
  #[serde(rename = "Year", default)]
  pub year: String,
  #[serde(rename = "Rated", default)]
  pub rated: Option<String>,
  #[serde(rename = "Genre", default)]
  pub genre: Option<String>,
  #[serde(rename = "Director", default)]
  pub director: Option<String>,
  #[serde(rename = "Actors", default)]
  pub actors: Option<String>,
  #[serde(rename = "Plot", default)]
  pub plot: Option<String>,
  #[serde(rename = "imdbRating", default)]
  pub imdb_rating: Option<String>,
  #[serde(rename = "Ratings", default)]
  pub ratings: Vec<RatingEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RatingEntry {
  #[serde(rename = "Source")]
  pub source: String,
  #[serde(rename = "Value")]
  pub value: String,
}

#[async_trait]
pub trait MovieApi: Send + Sync {
  async fn search(&self, title: &str) -> Result<Vec<MovieSummary>, MovieError>;
  async fn details(&self, external_id: &str) -> Result<MovieDetails, MovieError>;
  /// Ratings text for the best match of `title`, as returned by the service.
  async fn rating(&self, title: &str) -> Result<String, MovieError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
  #[serde(rename = "Response")]
  response: String,
  #[serde(rename = "Error")]
  error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
  #[serde(rename = "Search", default)]
  search: Vec<MovieSummary>,
}

#[derive(Clone)]
pub struct OmdbClient {
  http: Client,
  base_url: String,
  api_key: String,
}

impl OmdbClient {
  pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
    Self {
      http,
      base_url: base_url.into(),
      api_key: api_key.into(),
    }
  }

  async fn fetch(&self, query: &[(&str, &str)]) -> Result<serde_json::Value, MovieError> {
    let value: serde_json::Value = self
      .http
      .get(&self.base_url)
      .query(&[("apikey", self.api_key.as_str())])
      .query(query)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    check_envelope(&value)?;
    Ok(value)
  }
}

fn check_envelope(value: &serde_json::Value) -> Result<(), MovieError> {
  let envelope: Envelope =
    serde_json::from_value(value.clone()).map_err(|err| MovieError::Api(format!("unexpected payload: {err}")))?;
  if envelope.response.eq_ignore_ascii_case("true") {
    return Ok(());
  }
  let message = envelope.error.unwrap_or_else(|| "unknown error".to_string());
  if message.to_ascii_lowercase().contains("not found") {
    Err(MovieError::NotFound(message))
  } else {
    Err(MovieError::Api(message))
  }
}

#[async_trait]
impl MovieApi for OmdbClient {
  #[instrument(skip(self))]
  async fn search(&self, title: &str) -> Result<Vec<MovieSummary>, MovieError> {
    let value = match self.fetch(&[("s", title), ("type", "movie")]).await {
      Ok(value) => value,
      Err(MovieError::NotFound(_)) => return Ok(Vec::new()),
      Err(err) => return Err(err),
    };
    let payload: SearchPayload =
      serde_json::from_value(value).map_err(|err| MovieError::Api(format!("unexpected search payload: {err}")))?;
    debug!(count = payload.search.len(), "movie search completed");
    Ok(payload.search)
  }

  #[instrument(skip(self))]
  async fn details(&self, external_id: &str) -> Result<MovieDetails, MovieError> {
    let value = self.fetch(&[("i", external_id), ("plot", "short")]).await?;
    serde_json::from_value(value).map_err(|err| MovieError::Api(format!("unexpected details payload: {err}")))
  }

  #[instrument(skip(self))]
  async fn rating(&self, title: &str) -> Result<String, MovieError> {
    let value = self.fetch(&[("t", title)]).await?;
    Ok(ratings_text(&value))
  }
}

/// Flattens whatever ratings the payload carries into `Source: Value` lines.
/// The payload is not validated beyond that.
pub fn ratings_text(value: &serde_json::Value) -> String {
  let title = value.get("Title").and_then(|t| t.as_str()).unwrap_or("Unknown title");
  let lines: Vec<String> = value
    .get("Ratings")
    .and_then(|ratings| ratings.as_array())
    .map(|entries| {
      entries
        .iter()
        .filter_map(|entry| {
          let source = entry.get("Source")?.as_str()?;
          let rating = entry.get("Value")?.as_str()?;
          Some(format!("{source}: {rating}"))
        })
        .collect()
    })
    .unwrap_or_default();

  if !lines.is_empty() {
    return format!("Ratings for {title}:\n{}", lines.join("\n"));
  }
  match value.get("imdbRating").and_then(|r| r.as_str()) {
    Some(rating) => format!("Ratings for {title}:\nIMDb: {rating}"),
    None => format!("No ratings available for {title}."),
  }
}

/// Renders the MarkdownV2 detail card sent for a single match.
pub fn render_details_card(details: &MovieDetails) -> String {
  let mut text = format!(
    "🎬 {} \\({}\\)",
    markdown::bold(&markdown::escape(&details.title)),
    markdown::escape(&details.year)
  );

  let fields = [
    ("Rated", &details.rated),
    ("Genre", &details.genre),
    ("Director", &details.director),
    ("Actors", &details.actors),
    ("IMDb rating", &details.imdb_rating),
  ];
  for (label, value) in fields {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty() && *v != "N/A") {
      text.push_str(&format!("\n{}: {}", markdown::bold(label), markdown::escape(value)));
    }
  }

  if let Some(plot) = details.plot.as_deref().filter(|p| !p.is_empty() && *p != "N/A") {
    text.push_str(&format!("\n\n{}", markdown::escape(plot)));
  }
  text
}
