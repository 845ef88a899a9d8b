use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Fixed buttons of the menu and the upload naming prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
  Time,
  Date,
  MovieDetails,
  MovieRatings,
  UrlUpload,
  Rename,
  KeepName,
  Cancel,
}

impl MenuAction {
  pub fn tag(self) -> &'static str {
    match self {
      Self::Time => "time",
      Self::Date => "date",
      Self::MovieDetails => "movie_details",
      Self::MovieRatings => "movie_ratings",
      Self::UrlUpload => "url_upload",
      Self::Rename => "rename",
      Self::KeepName => "default",
      Self::Cancel => "cancel",
    }
  }

  fn from_tag(tag: &str) -> Option<Self> {
    Some(match tag {
      "time" => Self::Time,
      "date" => Self::Date,
      "movie_details" => Self::MovieDetails,
      "movie_ratings" => Self::MovieRatings,
      "url_upload" => Self::UrlUpload,
      "rename" => Self::Rename,
      "default" => Self::KeepName,
      "cancel" => Self::Cancel,
      _ => return None,
    })
  }
}

/// Payload carried by an inline button. Movie choices only carry an index
/// into the conversation's current search results, never the title itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
  Menu(MenuAction),
  Movie { index: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized callback data: {0}")]
pub struct UnknownCallback(pub String);

impl fmt::Display for CallbackAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Menu(action) => write!(f, "menu:{}", action.tag()),
      Self::Movie { index } => write!(f, "movie:{index}"),
    }
  }
}

impl FromStr for CallbackAction {
  type Err = UnknownCallback;

  fn from_str(data: &str) -> Result<Self, Self::Err> {
    let unknown = || UnknownCallback(data.to_string());
    let (prefix, value) = data.split_once(':').ok_or_else(unknown)?;
    match prefix {
      "menu" => MenuAction::from_tag(value).map(Self::Menu).ok_or_else(unknown),
      "movie" => value
        .parse::<usize>()
        .map(|index| Self::Movie { index })
        .map_err(|_| unknown()),
      _ => Err(unknown()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::CallbackAction;
  use super::MenuAction;
  use super::UnknownCallback;

  #[test]
  fn encodes_menu_and_movie_payloads() {
    assert_eq!(CallbackAction::Menu(MenuAction::KeepName).to_string(), "menu:default");
    assert_eq!(CallbackAction::Movie { index: 2 }.to_string(), "movie:2");
  }

  #[test]
  fn parses_every_menu_tag() {
    let all = [
      MenuAction::Time,
      MenuAction::Date,
      MenuAction::MovieDetails,
      MenuAction::MovieRatings,
      MenuAction::UrlUpload,
      MenuAction::Rename,
      MenuAction::KeepName,
      MenuAction::Cancel,
    ];
    for action in all {
      let encoded = CallbackAction::Menu(action).to_string();
      assert_eq!(encoded.parse::<CallbackAction>(), Ok(CallbackAction::Menu(action)));
    }
  }

  #[test]
  fn movie_titles_never_parse_as_actions() {
    assert_eq!(
      "cancel".parse::<CallbackAction>(),
      Err(UnknownCallback("cancel".to_string()))
    );
    assert!("time".parse::<CallbackAction>().is_err());
    assert!("movie:Batman".parse::<CallbackAction>().is_err());
    assert!("menu:batman".parse::<CallbackAction>().is_err());
  }
}
