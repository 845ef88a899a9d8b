//! Conversation state machine behind the relay bot.
//!
//! The flow never talks to Telegram. Each step consumes the current
//! [`ConversationState`] and returns an [`Outcome`]: the next state, the
//! replies to deliver, and any downloaded files the conversation no longer
//! owns. The router in `handlers` performs the delivery.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::bot::actions::CallbackAction;
use crate::bot::actions::MenuAction;
use crate::bot::state::ConversationState;
use crate::clock::Clock;
use crate::config::CancelPolicy;
use crate::movies::MovieApi;
use crate::movies::MovieError;
use crate::movies::MovieSummary;
use crate::movies::render_details_card;
use crate::transfer::FileFetcher;
use crate::transfer::PendingUpload;
use crate::transfer::TransferError;
use crate::util::sanitize_file_name;

pub const WELCOME_TEXT: &str = "Hello! I'm a helpful bot. Choose an option:";
pub const GENERIC_FAILURE_TEXT: &str = "Oops! Something went wrong. Please try again later.";
const UNKNOWN_TEXT: &str = "I did not understand that. Use the menu buttons or /help.";
const DETAILS_PROMPT: &str = "Send me a movie title to get details";
const RATINGS_PROMPT: &str = "Send me a movie title to get ratings";
const URL_PROMPT: &str = "Send me the URL of the file you want to upload:";
const RENAME_PROMPT: &str = "Enter a new file name (without extension):";
const SELECT_MOVIE_TEXT: &str = "Select the correct movie:";
const SELECTION_CLOSED_TEXT: &str = "That search is closed. Choose Movie Details from /start to search again.";
const SELECTION_EXPIRED_TEXT: &str = "That selection has expired. Search again with Movie Details.";
const NO_PENDING_UPLOAD_TEXT: &str = "No file is waiting for a name.";
const NAME_DECISION_HINT: &str = "Tap one of the buttons above to choose the file name.";
const UPLOAD_CANCELLED_TEXT: &str = "Upload cancelled.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
  pub label: String,
  pub action: CallbackAction,
}

impl Button {
  fn menu(label: &str, action: MenuAction) -> Self {
    Self {
      label: label.to_string(),
      action: CallbackAction::Menu(action),
    }
  }
}

/// Transport-agnostic reply produced by a flow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  /// Short answer to a button press, shown as a toast.
  Notice(String),
  Text(String),
  /// MarkdownV2 text, already escaped.
  Markdown(String),
  Choices {
    text: String,
    rows: Vec<Vec<Button>>,
  },
  /// Send the file to the conversation, then release it.
  Document(PendingUpload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
  pub state: ConversationState,
  pub replies: Vec<Reply>,
  /// Downloads dropped by this step whose local files must be removed.
  pub released: Vec<PendingUpload>,
}

impl Outcome {
  fn new(state: ConversationState, replies: Vec<Reply>) -> Self {
    Self {
      state,
      replies,
      released: Vec::new(),
    }
  }

  fn idle(replies: Vec<Reply>) -> Self {
    Self::new(ConversationState::Idle, replies)
  }

  fn releasing(mut self, upload: Option<PendingUpload>) -> Self {
    self.released.extend(upload);
    self
  }
}

#[derive(Debug, Error)]
pub enum FlowError {
  #[error("movie search failed: {0}")]
  Search(#[source] MovieError),
  #[error(transparent)]
  Movie(#[from] MovieError),
  #[error(transparent)]
  Transfer(#[from] TransferError),
}

impl FlowError {
  pub fn user_message(&self) -> String {
    match self {
      Self::Search(_) => "Movie search failed. Please try again later.".to_string(),
      Self::Movie(MovieError::NotFound(_)) => "Movie not found.".to_string(),
      Self::Transfer(TransferError::InvalidUrl(_)) => {
        "That does not look like an http(s) link. Pick URL Upload to try again.".to_string()
      },
      Self::Transfer(TransferError::TooLarge { limit }) => {
        format!("That file is larger than the {} MB upload limit.", limit / (1024 * 1024))
      },
      Self::Movie(_) | Self::Transfer(_) => GENERIC_FAILURE_TEXT.to_string(),
    }
  }
}

pub struct Flow {
  movies: Arc<dyn MovieApi>,
  files: Arc<dyn FileFetcher>,
  clock: Arc<dyn Clock>,
  cancel_policy: CancelPolicy,
}

impl Flow {
  pub fn new(
    movies: Arc<dyn MovieApi>,
    files: Arc<dyn FileFetcher>,
    clock: Arc<dyn Clock>,
    cancel_policy: CancelPolicy,
  ) -> Self {
    Self {
      movies,
      files,
      clock,
      cancel_policy,
    }
  }

  pub fn files(&self) -> &Arc<dyn FileFetcher> {
    &self.files
  }

  /// Outcome of a step that failed: the conversation returns to `Idle`, the
  /// upload the step consumed is released and the user sees the error's text.
  pub fn on_error(err: &FlowError, consumed: Option<PendingUpload>) -> Outcome {
    Outcome::idle(vec![Reply::Text(err.user_message())]).releasing(consumed)
  }

  pub fn welcome() -> Reply {
    Reply::Choices {
      text: WELCOME_TEXT.to_string(),
      rows: vec![
        vec![
          Button::menu("Time", MenuAction::Time),
          Button::menu("Date", MenuAction::Date),
        ],
        vec![
          Button::menu("Movie Details", MenuAction::MovieDetails),
          Button::menu("Movie Ratings", MenuAction::MovieRatings),
        ],
        vec![Button::menu("URL Upload", MenuAction::UrlUpload)],
      ],
    }
  }

  /// Handles a free-text message. The current state is consumed.
  pub async fn on_text(&self, state: ConversationState, text: &str) -> Result<Outcome, FlowError> {
    let text = text.trim();
    match state {
      ConversationState::Idle => Ok(Outcome::idle(vec![Reply::Text(UNKNOWN_TEXT.to_string())])),
      ConversationState::AwaitingMovieTitleForDetails if text.is_empty() => Ok(Outcome::new(
        ConversationState::AwaitingMovieTitleForDetails,
        vec![Reply::Text(DETAILS_PROMPT.to_string())],
      )),
      ConversationState::AwaitingMovieTitleForDetails => self.movie_details(text).await,
      ConversationState::AwaitingMovieTitleForRating if text.is_empty() => Ok(Outcome::new(
        ConversationState::AwaitingMovieTitleForRating,
        vec![Reply::Text(RATINGS_PROMPT.to_string())],
      )),
      ConversationState::AwaitingMovieTitleForRating => self.movie_rating(text).await,
      ConversationState::SelectingMovie { .. } => {
        Ok(Outcome::idle(vec![Reply::Text(SELECTION_CLOSED_TEXT.to_string())]))
      },
      ConversationState::AwaitingUrl if text.is_empty() => Ok(Outcome::new(
        ConversationState::AwaitingUrl,
        vec![Reply::Text(URL_PROMPT.to_string())],
      )),
      ConversationState::AwaitingUrl => self.url_upload(text).await,
      state @ ConversationState::AwaitingNameDecision { .. } => {
        Ok(Outcome::new(state, vec![Reply::Text(NAME_DECISION_HINT.to_string())]))
      },
      ConversationState::AwaitingRenameName { upload } => Ok(rename(upload, text)),
    }
  }

  /// Handles a button press. Menu entries that expect a follow-up message
  /// overwrite whatever was armed before.
  pub async fn on_button(&self, state: ConversationState, action: CallbackAction) -> Result<Outcome, FlowError> {
    match action {
      CallbackAction::Menu(MenuAction::Time) => Ok(Outcome::new(
        state,
        vec![Reply::Notice(format!("Current time: {}", self.clock.now()))],
      )),
      CallbackAction::Menu(MenuAction::Date) => Ok(Outcome::new(
        state,
        vec![Reply::Notice(format!("Today's date: {}", self.clock.today()))],
      )),
      CallbackAction::Menu(MenuAction::MovieDetails) => {
        Ok(arm(state, ConversationState::AwaitingMovieTitleForDetails, DETAILS_PROMPT))
      },
      CallbackAction::Menu(MenuAction::MovieRatings) => {
        Ok(arm(state, ConversationState::AwaitingMovieTitleForRating, RATINGS_PROMPT))
      },
      CallbackAction::Menu(MenuAction::UrlUpload) => Ok(arm(state, ConversationState::AwaitingUrl, URL_PROMPT)),
      CallbackAction::Menu(MenuAction::Rename) => Ok(match state {
        ConversationState::AwaitingNameDecision { upload } | ConversationState::AwaitingRenameName { upload } => {
          Outcome::new(
            ConversationState::AwaitingRenameName { upload },
            vec![Reply::Text(RENAME_PROMPT.to_string())],
          )
        },
        other => Outcome::new(other, vec![Reply::Notice(NO_PENDING_UPLOAD_TEXT.to_string())]),
      }),
      CallbackAction::Menu(MenuAction::KeepName) => Ok(match state {
        ConversationState::AwaitingNameDecision { upload } | ConversationState::AwaitingRenameName { upload } => {
          finalize(upload)
        },
        other => Outcome::new(other, vec![Reply::Notice(NO_PENDING_UPLOAD_TEXT.to_string())]),
      }),
      CallbackAction::Menu(MenuAction::Cancel) => Ok(self.cancel(state)),
      CallbackAction::Movie { index } => self.select_movie(state, index).await,
    }
  }

  async fn movie_details(&self, title: &str) -> Result<Outcome, FlowError> {
    let candidates = self.movies.search(title).await.map_err(FlowError::Search)?;
    info!(title, count = candidates.len(), "movie search finished");
    match candidates.as_slice() {
      [] => Ok(Outcome::idle(vec![Reply::Text("Movie not found.".to_string())])),
      [only] => {
        let details = self.movies.details(&only.external_id).await?;
        Ok(Outcome::idle(vec![Reply::Markdown(render_details_card(&details))]))
      },
      _ => {
        let rows = candidate_rows(&candidates);
        Ok(Outcome::new(
          ConversationState::SelectingMovie { candidates },
          vec![Reply::Choices {
            text: SELECT_MOVIE_TEXT.to_string(),
            rows,
          }],
        ))
      },
    }
  }

  async fn movie_rating(&self, title: &str) -> Result<Outcome, FlowError> {
    let ratings = self.movies.rating(title).await?;
    Ok(Outcome::idle(vec![Reply::Text(ratings)]))
  }

  async fn select_movie(&self, state: ConversationState, index: usize) -> Result<Outcome, FlowError> {
    let chosen = match &state {
      ConversationState::SelectingMovie { candidates } => candidates.get(index).cloned(),
      _ => None,
    };
    let Some(movie) = chosen else {
      return Ok(Outcome::new(state, vec![Reply::Notice(SELECTION_EXPIRED_TEXT.to_string())]));
    };
    let details = self.movies.details(&movie.external_id).await?;
    Ok(Outcome::idle(vec![Reply::Markdown(render_details_card(&details))]))
  }

  async fn url_upload(&self, url: &str) -> Result<Outcome, FlowError> {
    let upload = self.files.fetch(url).await?;
    let text = format!(
      "File downloaded: {}. Keep this name or pick a new one?",
      upload.display_name()
    );
    Ok(Outcome::new(
      ConversationState::AwaitingNameDecision { upload },
      vec![Reply::Choices {
        text,
        rows: vec![vec![
          Button::menu("Keep name", MenuAction::KeepName),
          Button::menu("Rename", MenuAction::Rename),
          Button::menu("Cancel", MenuAction::Cancel),
        ]],
      }],
    ))
  }

  fn cancel(&self, state: ConversationState) -> Outcome {
    match state {
      ConversationState::AwaitingNameDecision { upload } | ConversationState::AwaitingRenameName { upload } => {
        match self.cancel_policy {
          CancelPolicy::Send => finalize(upload),
          CancelPolicy::Discard => {
            Outcome::idle(vec![Reply::Text(UPLOAD_CANCELLED_TEXT.to_string())]).releasing(Some(upload))
          },
        }
      },
      other => Outcome::new(other, vec![Reply::Notice(NO_PENDING_UPLOAD_TEXT.to_string())]),
    }
  }
}

fn arm(previous: ConversationState, next: ConversationState, prompt: &str) -> Outcome {
  Outcome::new(next, vec![Reply::Text(prompt.to_string())]).releasing(previous.into_pending_upload())
}

fn rename(upload: PendingUpload, new_stem: &str) -> Outcome {
  if sanitize_file_name(new_stem).is_empty() {
    return Outcome::new(
      ConversationState::AwaitingRenameName { upload },
      vec![Reply::Text(RENAME_PROMPT.to_string())],
    );
  }
  finalize(upload.renamed(new_stem))
}

fn finalize(upload: PendingUpload) -> Outcome {
  Outcome::idle(vec![Reply::Document(upload)])
}

fn candidate_rows(candidates: &[MovieSummary]) -> Vec<Vec<Button>> {
  candidates
    .iter()
    .enumerate()
    .map(|(index, movie)| {
      vec![Button {
        label: movie.label(),
        action: CallbackAction::Movie { index },
      }]
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Arc;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use reqwest::Url;

  use super::Button;
  use super::Flow;
  use super::FlowError;
  use super::Outcome;
  use super::Reply;
  use crate::bot::actions::CallbackAction;
  use crate::bot::actions::MenuAction;
  use crate::bot::state::ConversationState;
  use crate::clock::Clock;
  use crate::config::CancelPolicy;
  use crate::movies::MovieApi;
  use crate::movies::MovieDetails;
  use crate::movies::MovieError;
  use crate::movies::MovieSummary;
  use crate::transfer::FileFetcher;
  use crate::transfer::PendingUpload;
  use crate::transfer::TransferError;
use crate::util::sanitize_file_name;
  use crate::transfer::parse_download_url;
  use crate::util::infer_file_name;

  struct FakeMovies {
    /// `None` makes every search fail.
    candidates: Option<Vec<MovieSummary>>,
    calls: Mutex<Vec<String>>,
  }

  impl FakeMovies {
    fn with(candidates: Option<Vec<MovieSummary>>) -> Arc<Self> {
      Arc::new(Self {
        candidates,
        calls: Mutex::new(Vec::new()),
      })
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl MovieApi for FakeMovies {
    async fn search(&self, title: &str) -> Result<Vec<MovieSummary>, MovieError> {
      self.calls.lock().unwrap().push(format!("search:{title}"));
      self
        .candidates
        .clone()
        .ok_or_else(|| MovieError::Api("service unavailable".to_string()))
    }

    async fn details(&self, external_id: &str) -> Result<MovieDetails, MovieError> {
      self.calls.lock().unwrap().push(format!("details:{external_id}"));
      Ok(MovieDetails {
        title: format!("Title of {external_id}"),
        year: "2010".to_string(),
        rated: None,
        genre: None,
        director: None,
        actors: None,
        plot: Some("A plot.".to_string()),
        imdb_rating: Some("8.8".to_string()),
        ratings: Vec::new(),
      })
    }

    async fn rating(&self, title: &str) -> Result<String, MovieError> {
      self.calls.lock().unwrap().push(format!("rating:{title}"));
      Ok(format!("Ratings for {title}:\nIMDb: 8.8"))
    }
  }

  #[derive(Default)]
  struct FakeFetcher {
    fetched: Mutex<Vec<String>>,
  }

  #[async_trait]
  impl FileFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<PendingUpload, TransferError> {
      let parsed: Url = parse_download_url(url)?;
      let mut fetched = self.fetched.lock().unwrap();
      fetched.push(url.to_string());
      let path = PathBuf::from(format!("/tmp/upload-{}", fetched.len()));
      Ok(PendingUpload::new(path, infer_file_name(&parsed, None), 42))
    }
  }

  struct FixedClock;

  impl Clock for FixedClock {
    fn now(&self) -> String {
      "12:34:56".to_string()
    }

    fn today(&self) -> String {
      "2024-05-01".to_string()
    }
  }

  fn movie(title: &str, year: &str, id: &str) -> MovieSummary {
    MovieSummary {
      title: title.to_string(),
      year: year.to_string(),
      external_id: id.to_string(),
    }
  }

  fn flow_with(movies: Arc<FakeMovies>, policy: CancelPolicy) -> Flow {
    Flow::new(movies, Arc::new(FakeFetcher::default()), Arc::new(FixedClock), policy)
  }

  fn flow() -> Flow {
    flow_with(FakeMovies::with(Some(Vec::new())), CancelPolicy::Send)
  }

  fn menu(action: MenuAction) -> CallbackAction {
    CallbackAction::Menu(action)
  }

  fn sent_documents(outcome: &Outcome) -> Vec<&PendingUpload> {
    outcome
      .replies
      .iter()
      .filter_map(|reply| match reply {
        Reply::Document(upload) => Some(upload),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn welcome_offers_five_menu_buttons() {
    let Reply::Choices { text, rows } = Flow::welcome() else {
      panic!("welcome must carry buttons");
    };
    assert_eq!(text, "Hello! I'm a helpful bot. Choose an option:");
    let buttons: Vec<&Button> = rows.iter().flatten().collect();
    let labels: Vec<&str> = buttons.iter().map(|b| b.label.as_str()).collect();
    assert_eq!(labels, ["Time", "Date", "Movie Details", "Movie Ratings", "URL Upload"]);
    assert!(rows.iter().all(|row| row.len() <= 2));
    assert_eq!(buttons[2].action, menu(MenuAction::MovieDetails));
  }

  #[tokio::test]
  async fn time_and_date_answer_without_touching_state() {
    let flow = flow();
    let outcome = flow
      .on_button(ConversationState::AwaitingUrl, menu(MenuAction::Time))
      .await
      .unwrap();
    assert_eq!(outcome.state, ConversationState::AwaitingUrl);
    assert_eq!(outcome.replies, vec![Reply::Notice("Current time: 12:34:56".to_string())]);

    let outcome = flow
      .on_button(ConversationState::Idle, menu(MenuAction::Date))
      .await
      .unwrap();
    assert_eq!(outcome.replies, vec![Reply::Notice("Today's date: 2024-05-01".to_string())]);
  }

  #[tokio::test]
  async fn single_match_sends_card_without_menu() {
    let movies = FakeMovies::with(Some(vec![movie("Inception", "2010", "tt1375666")]));
    let flow = flow_with(movies.clone(), CancelPolicy::Send);

    let armed = flow
      .on_button(ConversationState::Idle, menu(MenuAction::MovieDetails))
      .await
      .unwrap();
    assert_eq!(armed.state, ConversationState::AwaitingMovieTitleForDetails);
    assert_eq!(
      armed.replies,
      vec![Reply::Text("Send me a movie title to get details".to_string())]
    );

    let outcome = flow.on_text(armed.state, "Inception").await.unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert_eq!(outcome.replies.len(), 1);
    let Reply::Markdown(card) = &outcome.replies[0] else {
      panic!("expected a detail card");
    };
    assert!(card.contains("Title of tt1375666"));
    assert_eq!(movies.calls(), ["search:Inception", "details:tt1375666"]);
  }

  #[tokio::test]
  async fn several_matches_offer_one_button_each() {
    let movies = FakeMovies::with(Some(vec![
      movie("Batman", "1989", "tt1"),
      movie("Batman Begins", "2005", "tt2"),
      movie("The Batman", "2022", "tt3"),
    ]));
    let flow = flow_with(movies.clone(), CancelPolicy::Send);

    let outcome = flow
      .on_text(ConversationState::AwaitingMovieTitleForDetails, "Batman")
      .await
      .unwrap();
    let Reply::Choices { text, rows } = &outcome.replies[0] else {
      panic!("expected a selection menu");
    };
    assert_eq!(text, "Select the correct movie:");
    let labels: Vec<&str> = rows.iter().flatten().map(|b| b.label.as_str()).collect();
    assert_eq!(labels, ["Batman (1989)", "Batman Begins (2005)", "The Batman (2022)"]);
    let actions: Vec<CallbackAction> = rows.iter().flatten().map(|b| b.action).collect();
    assert_eq!(
      actions,
      [
        CallbackAction::Movie { index: 0 },
        CallbackAction::Movie { index: 1 },
        CallbackAction::Movie { index: 2 },
      ]
    );
    assert!(!outcome.replies.iter().any(|r| matches!(r, Reply::Markdown(_))));
    assert_eq!(movies.calls(), ["search:Batman"]);

    let picked = flow
      .on_button(outcome.state, CallbackAction::Movie { index: 1 })
      .await
      .unwrap();
    assert_eq!(picked.state, ConversationState::Idle);
    assert!(matches!(&picked.replies[0], Reply::Markdown(card) if card.contains("tt2")));
  }

  #[tokio::test]
  async fn stale_selection_is_rejected() {
    let flow = flow();
    let outcome = flow
      .on_button(ConversationState::Idle, CallbackAction::Movie { index: 0 })
      .await
      .unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert!(matches!(&outcome.replies[0], Reply::Notice(_)));

    let selecting = ConversationState::SelectingMovie {
      candidates: vec![movie("Heat", "1995", "tt9")],
    };
    let outcome = flow
      .on_button(selecting.clone(), CallbackAction::Movie { index: 5 })
      .await
      .unwrap();
    assert_eq!(outcome.state, selecting);
  }

  #[tokio::test]
  async fn title_matching_a_menu_tag_is_searched_as_text() {
    let movies = FakeMovies::with(Some(vec![movie("Cancel", "2001", "tt7")]));
    let flow = flow_with(movies.clone(), CancelPolicy::Send);
    let outcome = flow
      .on_text(ConversationState::AwaitingMovieTitleForDetails, "cancel")
      .await
      .unwrap();
    assert!(matches!(&outcome.replies[0], Reply::Markdown(_)));
    assert_eq!(movies.calls(), ["search:cancel", "details:tt7"]);
  }

  #[tokio::test]
  async fn search_outcomes_for_failure_and_empty_results() {
    let failing = flow_with(FakeMovies::with(None), CancelPolicy::Send);
    let err = failing
      .on_text(ConversationState::AwaitingMovieTitleForDetails, "Anything")
      .await
      .unwrap_err();
    assert!(matches!(err, FlowError::Search(_)));
    assert_eq!(err.user_message(), "Movie search failed. Please try again later.");

    let outcome = flow()
      .on_text(ConversationState::AwaitingMovieTitleForDetails, "Nothing")
      .await
      .unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert_eq!(outcome.replies, vec![Reply::Text("Movie not found.".to_string())]);
  }

  #[tokio::test]
  async fn rating_returns_adapter_text_verbatim() {
    let movies = FakeMovies::with(Some(Vec::new()));
    let flow = flow_with(movies.clone(), CancelPolicy::Send);
    let outcome = flow
      .on_text(ConversationState::AwaitingMovieTitleForRating, " Heat ")
      .await
      .unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert_eq!(outcome.replies, vec![Reply::Text("Ratings for Heat:\nIMDb: 8.8".to_string())]);
    assert_eq!(movies.calls(), ["rating:Heat"]);
  }

  #[tokio::test]
  async fn idle_text_is_not_understood() {
    let outcome = flow().on_text(ConversationState::Idle, "hello").await.unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert!(matches!(&outcome.replies[0], Reply::Text(text) if text.contains("/help")));
  }

  async fn downloaded(flow: &Flow) -> Outcome {
    let armed = flow
      .on_button(ConversationState::Idle, menu(MenuAction::UrlUpload))
      .await
      .unwrap();
    assert_eq!(armed.state, ConversationState::AwaitingUrl);
    flow.on_text(armed.state, "http://x/file.zip").await.unwrap()
  }

  #[tokio::test]
  async fn url_upload_offers_naming_choices() {
    let outcome = downloaded(&flow()).await;
    assert!(matches!(outcome.state, ConversationState::AwaitingNameDecision { .. }));
    let Reply::Choices { rows, .. } = &outcome.replies[0] else {
      panic!("expected naming buttons");
    };
    let actions: Vec<CallbackAction> = rows.iter().flatten().map(|b| b.action).collect();
    assert_eq!(
      actions,
      [
        menu(MenuAction::KeepName),
        menu(MenuAction::Rename),
        menu(MenuAction::Cancel)
      ]
    );
  }

  #[tokio::test]
  async fn keep_name_sends_exactly_one_file() {
    let flow = flow();
    let pending = downloaded(&flow).await;
    let outcome = flow.on_button(pending.state, menu(MenuAction::KeepName)).await.unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    let documents = sent_documents(&outcome);
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].display_name(), "file.zip");
  }

  #[tokio::test]
  async fn rename_sends_file_with_new_stem() {
    let flow = flow();
    let pending = downloaded(&flow).await;
    let asked = flow.on_button(pending.state, menu(MenuAction::Rename)).await.unwrap();
    assert!(matches!(asked.state, ConversationState::AwaitingRenameName { .. }));
    assert_eq!(
      asked.replies,
      vec![Reply::Text("Enter a new file name (without extension):".to_string())]
    );

    let outcome = flow.on_text(asked.state, "foo").await.unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    let documents = sent_documents(&outcome);
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].display_name(), "foo.zip");
  }

  #[tokio::test]
  async fn blank_rename_asks_again() {
    let flow = flow();
    let pending = downloaded(&flow).await;
    let asked = flow.on_button(pending.state, menu(MenuAction::Rename)).await.unwrap();
    for input in ["   ", "...", " . . "] {
      let outcome = flow.on_text(asked.state.clone(), input).await.unwrap();
      assert_eq!(outcome.state, asked.state, "input {input:?}");
      assert!(sent_documents(&outcome).is_empty(), "input {input:?}");
    }
  }

  #[tokio::test]
  async fn stray_text_keeps_pending_upload() {
    let flow = flow();
    let pending = downloaded(&flow).await;
    let outcome = flow.on_text(pending.state.clone(), "what now?").await.unwrap();
    assert_eq!(outcome.state, pending.state);
    assert!(outcome.released.is_empty());
  }

  #[tokio::test]
  async fn cancel_sends_file_under_default_policy() {
    // Observed behavior kept as the default: cancel still uploads the file.
    // The label suggests a discard; that variant sits behind UPLOAD_CANCEL=discard.
    let flow = flow();
    let pending = downloaded(&flow).await;
    let outcome = flow.on_button(pending.state, menu(MenuAction::Cancel)).await.unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert_eq!(sent_documents(&outcome).len(), 1);
  }

  #[tokio::test]
  async fn cancel_discards_under_discard_policy() {
    let flow = flow_with(FakeMovies::with(Some(Vec::new())), CancelPolicy::Discard);
    let pending = downloaded(&flow).await;
    let upload = pending.state.pending_upload().cloned().unwrap();
    let outcome = flow.on_button(pending.state, menu(MenuAction::Cancel)).await.unwrap();
    assert_eq!(outcome.state, ConversationState::Idle);
    assert!(sent_documents(&outcome).is_empty());
    assert_eq!(outcome.released, vec![upload]);
  }

  #[tokio::test]
  async fn naming_buttons_without_upload_are_noticed() {
    let flow = flow();
    for action in [MenuAction::Rename, MenuAction::KeepName, MenuAction::Cancel] {
      let outcome = flow.on_button(ConversationState::Idle, menu(action)).await.unwrap();
      assert_eq!(outcome.state, ConversationState::Idle);
      assert!(matches!(&outcome.replies[0], Reply::Notice(_)));
    }
  }

  #[tokio::test]
  async fn rearming_overwrites_silently_and_releases_upload() {
    let flow = flow();
    let first = flow
      .on_button(ConversationState::Idle, menu(MenuAction::MovieDetails))
      .await
      .unwrap();
    let second = flow.on_button(first.state, menu(MenuAction::MovieRatings)).await.unwrap();
    assert_eq!(second.state, ConversationState::AwaitingMovieTitleForRating);
    assert!(second.released.is_empty());

    let pending = downloaded(&flow).await;
    let upload = pending.state.pending_upload().cloned().unwrap();
    let rearmed = flow.on_button(pending.state, menu(MenuAction::UrlUpload)).await.unwrap();
    assert_eq!(rearmed.state, ConversationState::AwaitingUrl);
    assert_eq!(rearmed.released, vec![upload]);
  }

  #[tokio::test]
  async fn invalid_url_maps_to_friendly_error() {
    let err = flow()
      .on_text(ConversationState::AwaitingUrl, "not a link")
      .await
      .unwrap_err();
    assert!(matches!(err, FlowError::Transfer(TransferError::InvalidUrl(_))));
    assert!(err.user_message().contains("http(s)"));
  }

  #[tokio::test]
  async fn failed_step_returns_to_idle_with_user_text() {
    let flow = flow_with(FakeMovies::with(None), CancelPolicy::Send);
    let err = flow
      .on_text(ConversationState::AwaitingMovieTitleForDetails, "Heat")
      .await
      .unwrap_err();
    let outcome = Flow::on_error(&err, None);
    assert_eq!(outcome.state, ConversationState::Idle);
    assert_eq!(
      outcome.replies,
      vec![Reply::Text("Movie search failed. Please try again later.".to_string())]
    );
    assert!(outcome.released.is_empty());
  }

  #[tokio::test]
  async fn failed_step_releases_the_consumed_upload() {
    let flow = flow();
    let pending = downloaded(&flow).await;
    let upload = pending.state.pending_upload().cloned().unwrap();
    let err = FlowError::Transfer(TransferError::Io(std::io::Error::other("disk gone")));

    let outcome = Flow::on_error(&err, Some(upload.clone()));
    assert_eq!(outcome.state, ConversationState::Idle);
    assert_eq!(outcome.released, vec![upload]);
    assert_eq!(
      outcome.replies,
      vec![Reply::Text("Oops! Something went wrong. Please try again later.".to_string())]
    );
    assert!(sent_documents(&outcome).is_empty());
  }

  #[test]
  fn too_large_message_reports_megabytes() {
    let err = FlowError::Transfer(TransferError::TooLarge {
      limit: 50 * 1024 * 1024,
    });
    assert_eq!(err.user_message(), "That file is larger than the 50 MB upload limit.");
  }
}
