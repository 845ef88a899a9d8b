use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum BloggerCommand {
  /// Say hello
  Start,
  /// Connect your Google account
  Authenticate,
  /// Write the given text into the draft post
  Post(String),
}

#[cfg(test)]
mod tests {
  use teloxide::utils::command::BotCommands;

  use super::BloggerCommand;

  #[test]
  fn post_takes_the_rest_of_the_line() {
    let parsed = BloggerCommand::parse("/post Hello there, world", "blogger_bot").unwrap();
    assert_eq!(parsed, BloggerCommand::Post("Hello there, world".to_string()));
  }

  #[test]
  fn post_without_body_parses_empty() {
    assert_eq!(
      BloggerCommand::parse("/post", "blogger_bot").unwrap(),
      BloggerCommand::Post(String::new())
    );
    assert_eq!(
      BloggerCommand::parse("/authenticate", "blogger_bot").unwrap(),
      BloggerCommand::Authenticate
    );
  }
}
