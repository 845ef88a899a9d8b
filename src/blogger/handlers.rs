use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::types::Message;
use teloxide::types::ParseMode;
use teloxide::types::UserId;
use teloxide::utils::html;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::blogger::BloggerContext;
use crate::blogger::BloggerStorage;
use crate::blogger::api::BloggerClient;
use crate::blogger::api::publish;
use crate::blogger::commands::BloggerCommand;
use crate::blogger::oauth::Credentials;
use crate::blogger::state::BloggerState;
use crate::bot::HandlerResult;

type SharedContext = Arc<BloggerContext>;
type BloggerDialogue = Dialogue<BloggerState, BloggerStorage>;

const REDIRECT_TEXT: &str = "Redirecting to authenticate with Google. Please follow the instructions.";
const AUTHENTICATED_TEXT: &str = "Authentication successful! You can now create and edit posts.";
const NOT_AUTHENTICATED_TEXT: &str = "You need to authenticate first. Use /authenticate.";
const EMPTY_POST_TEXT: &str = "Please provide the content for the post.";

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let commands = dptree::entry()
    .filter_command::<BloggerCommand>()
    .branch(dptree::case![BloggerCommand::Start].endpoint(handle_start))
    .branch(dptree::case![BloggerCommand::Authenticate].endpoint(handle_authenticate))
    .branch(dptree::case![BloggerCommand::Post(body)].endpoint(handle_post_command));

  Update::filter_message()
    .enter_dialogue::<Message, BloggerStorage, BloggerState>()
    .branch(commands)
    .branch(dptree::endpoint(handle_text))
}

fn greeting(user: Option<(UserId, &str)>) -> String {
  let mention = match user {
    Some((id, name)) => html::user_mention(id, name),
    None => "there".to_string(),
  };
  format!(
    "Hi {mention}! I can help you edit and publish posts on your Blogger account.\nType /authenticate to get started."
  )
}

fn auth_failure_text(err: &dyn std::fmt::Display) -> String {
  format!("Authentication failed: {err}. Try /authenticate again.")
}

#[instrument(skip(bot, msg))]
async fn handle_start(bot: Bot, msg: Message) -> HandlerResult {
  let name = msg.from.as_ref().map(|user| (user.id, user.full_name()));
  bot
    .send_message(
      msg.chat.id,
      greeting(name.as_ref().map(|(id, name)| (*id, name.as_str()))),
    )
    .parse_mode(ParseMode::Html)
    .await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_authenticate(bot: Bot, dialogue: BloggerDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  let chat = msg.chat.id;
  info!(chat_id = %chat, "starting authentication");
  bot.send_message(chat, REDIRECT_TEXT).await?;

  match authenticate(&bot, chat, &ctx).await {
    Ok(credentials) => {
      dialogue.update(BloggerState::Authenticated { credentials }).await?;
      bot.send_message(chat, AUTHENTICATED_TEXT).await?;
    },
    Err(err) => {
      warn!(chat_id = %chat, error = %err, "authentication failed");
      bot.send_message(chat, auth_failure_text(&err)).await?;
    },
  }
  Ok(())
}

async fn authenticate(bot: &Bot, chat: ChatId, ctx: &BloggerContext) -> anyhow::Result<Credentials> {
  if let Some(credentials) = ctx.auth().restore().await? {
    info!(chat_id = %chat, "reusing stored credentials");
    return Ok(credentials);
  }
  let pending = ctx.auth().begin().await?;
  bot
    .send_message(
      chat,
      format!(
        "Open this link, grant access, and come back here:\n{}",
        pending.authorization_url()
      ),
    )
    .await?;
  Ok(ctx.auth().complete(pending).await?)
}

#[instrument(skip(bot, dialogue, ctx, msg, state, body))]
async fn handle_post_command(
  bot: Bot,
  dialogue: BloggerDialogue,
  ctx: SharedContext,
  msg: Message,
  state: BloggerState,
  body: String,
) -> HandlerResult {
  publish_body(&bot, &dialogue, &ctx, msg.chat.id, state, &body).await
}

#[instrument(skip(bot, dialogue, ctx, msg, state))]
async fn handle_text(
  bot: Bot,
  dialogue: BloggerDialogue,
  ctx: SharedContext,
  msg: Message,
  state: BloggerState,
) -> HandlerResult {
  let Some(text) = msg.text() else {
    return Ok(());
  };
  if text.starts_with('/') {
    return Ok(());
  }
  publish_body(&bot, &dialogue, &ctx, msg.chat.id, state, text).await
}

async fn publish_body(
  bot: &Bot,
  dialogue: &BloggerDialogue,
  ctx: &BloggerContext,
  chat: ChatId,
  state: BloggerState,
  body: &str,
) -> HandlerResult {
  let BloggerState::Authenticated { credentials } = state else {
    bot.send_message(chat, NOT_AUTHENTICATED_TEXT).await?;
    return Ok(());
  };
  let body = body.trim();
  if body.is_empty() {
    bot.send_message(chat, EMPTY_POST_TEXT).await?;
    return Ok(());
  }

  let credentials = match ctx.auth().fresh(credentials).await {
    Ok(credentials) => credentials,
    Err(err) => {
      warn!(chat_id = %chat, error = %err, "credential refresh failed");
      dialogue.reset().await?;
      bot.send_message(chat, auth_failure_text(&err)).await?;
      return Ok(());
    },
  };
  dialogue
    .update(BloggerState::Authenticated {
      credentials: credentials.clone(),
    })
    .await?;

  let client = BloggerClient::new(ctx.http().clone(), credentials.access_token);
  match publish(&client, ctx.blog_id(), body).await {
    Ok(published) => {
      info!(chat_id = %chat, "post published");
      bot.send_message(chat, published.message()).await?;
    },
    Err(err) => {
      warn!(chat_id = %chat, error = %err, "publishing failed");
      bot.send_message(chat, format!("An error occurred: {err}")).await?;
    },
  }
  Ok(())
}
