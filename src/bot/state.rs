use serde::Deserialize;
use serde::Serialize;

use crate::movies::MovieSummary;
use crate::transfer::PendingUpload;

/// What the bot expects next from a conversation. One value per chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum ConversationState {
  #[default]
  Idle,
  AwaitingMovieTitleForDetails,
  AwaitingMovieTitleForRating,
  SelectingMovie {
    candidates: Vec<MovieSummary>,
  },
  AwaitingUrl,
  AwaitingNameDecision {
    upload: PendingUpload,
  },
  AwaitingRenameName {
    upload: PendingUpload,
  },
}

impl ConversationState {
  pub fn pending_upload(&self) -> Option<&PendingUpload> {
    match self {
      Self::AwaitingNameDecision { upload } | Self::AwaitingRenameName { upload } => Some(upload),
      _ => None,
    }
  }

  pub fn into_pending_upload(self) -> Option<PendingUpload> {
    match self {
      Self::AwaitingNameDecision { upload } | Self::AwaitingRenameName { upload } => Some(upload),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::ConversationState;
  use crate::transfer::PendingUpload;

  #[test]
  fn default_state_is_idle() {
    assert_eq!(ConversationState::default(), ConversationState::Idle);
    assert!(ConversationState::default().pending_upload().is_none());
  }

  #[test]
  fn exposes_pending_upload() {
    let upload = PendingUpload::new(PathBuf::from("/tmp/upload-1"), "file.zip", 3);
    let state = ConversationState::AwaitingRenameName { upload: upload.clone() };
    assert_eq!(state.pending_upload(), Some(&upload));
    assert_eq!(state.into_pending_upload(), Some(upload));
  }
}
