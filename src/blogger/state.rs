use serde::Deserialize;
use serde::Serialize;

use crate::blogger::oauth::Credentials;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum BloggerState {
  #[default]
  Anonymous,
  Authenticated {
    credentials: Credentials,
  },
}
