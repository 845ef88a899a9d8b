use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
  /// Open the main menu
  Start,
  /// Show the main menu
  Help,
  /// Download a file from a link and send it back right away
  Upload(String),
}

#[cfg(test)]
mod tests {
  use teloxide::utils::command::BotCommands;

  use super::Command;

  #[test]
  fn parses_upload_argument() {
    let parsed = Command::parse("/upload http://x/file.zip", "relay_bot").unwrap();
    assert_eq!(parsed, Command::Upload("http://x/file.zip".to_string()));
  }

  #[test]
  fn parses_menu_commands() {
    assert_eq!(Command::parse("/start", "relay_bot").unwrap(), Command::Start);
    assert_eq!(Command::parse("/help", "relay_bot").unwrap(), Command::Help);
  }
}
