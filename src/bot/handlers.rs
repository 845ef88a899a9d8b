use std::sync::Arc;

use anyhow::Context;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatId;
use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::InputFile;
use teloxide::types::Message;
use teloxide::types::MessageId;
use teloxide::types::ParseMode;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::Command;
use crate::bot::DialogueStorage;
use crate::bot::HandlerResult;
use crate::bot::actions::CallbackAction;
use crate::bot::context::AppContext;
use crate::bot::flow::Button;
use crate::bot::flow::Flow;
use crate::bot::flow::FlowError;
use crate::bot::flow::GENERIC_FAILURE_TEXT;
use crate::bot::flow::Outcome;
use crate::bot::flow::Reply;
use crate::bot::state::ConversationState;
use crate::transfer::Milestones;
use crate::transfer::PendingUpload;
use crate::transfer::ProgressReader;
use crate::transfer::percent;

type SharedContext = Arc<AppContext>;
type BotDialogue = Dialogue<ConversationState, DialogueStorage>;

const STALE_BUTTON_TEXT: &str = "This button is no longer valid. Use /start to open the menu.";
const UPLOAD_USAGE_TEXT: &str = "Usage: /upload <url>";
const UPLOAD_CAPTION: &str = "Uploaded file";

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, DialogueStorage, ConversationState>()
    .branch(command_branch())
    .branch(dptree::endpoint(handle_text));

  let callback_handler = Update::filter_callback_query()
    .enter_dialogue::<CallbackQuery, DialogueStorage, ConversationState>()
    .endpoint(handle_callback_query);

  dptree::entry().branch(message_handler).branch(callback_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start))
    .branch(dptree::case![Command::Help].endpoint(handle_start))
    .branch(dptree::case![Command::Upload(url)].endpoint(handle_upload))
}

#[instrument(skip(bot, msg))]
async fn handle_start(bot: Bot, msg: Message) -> HandlerResult {
  let user_id = msg.from.as_ref().map(|user| user.id.0);
  info!(user_id, chat_id = %msg.chat.id, "received menu command");
  if let Err(err) = deliver(&bot, msg.chat.id, vec![Flow::welcome()]).await {
    error!(chat_id = %msg.chat.id, error = %err, "failed to send welcome menu");
    bot.send_message(msg.chat.id, GENERIC_FAILURE_TEXT).await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, msg))]
async fn handle_upload(bot: Bot, ctx: SharedContext, msg: Message, url: String) -> HandlerResult {
  let chat = msg.chat.id;
  let url = url.trim();
  if url.is_empty() {
    bot.send_message(chat, UPLOAD_USAGE_TEXT).await?;
    return Ok(());
  }

  info!(chat_id = %chat, url, "received /upload command");
  bot.send_message(chat, "Starting file upload...").await?;
  let upload = match ctx.flow().files().fetch(url).await {
    Ok(upload) => upload,
    Err(err) => {
      let err = FlowError::from(err);
      warn!(chat_id = %chat, error = %err, "direct upload download failed");
      bot
        .send_message(chat, format!("Error uploading file: {}", err.user_message()))
        .await?;
      return Ok(());
    },
  };

  let result = send_with_progress(&bot, chat, &upload, Some(UPLOAD_CAPTION)).await;
  upload.release().await;
  if let Err(err) = result {
    error!(chat_id = %chat, error = %err, "direct upload failed");
    bot.send_message(chat, format!("Error uploading file: {err}")).await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg, state))]
async fn handle_text(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  state: ConversationState,
) -> HandlerResult {
  let chat = msg.chat.id;
  let text = message_text(&msg);

  if let Some(command) = text.filter(|t| t.starts_with('/')) {
    debug!(chat_id = %chat, command, "ignoring unknown command");
    return Ok(());
  }
  if text.is_none() && matches!(state, ConversationState::Idle) {
    return Ok(());
  }

  info!(chat_id = %chat, state = state_name(&state), "handling text message");
  let consumed = state.pending_upload().cloned();
  let result = ctx.flow().on_text(state, text.unwrap_or_default()).await;
  if let Err(err) = apply(&bot, &dialogue, chat, consumed, result, None).await {
    recover(&bot, &dialogue, chat, err).await;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, query, state))]
async fn handle_callback_query(
  bot: Bot,
  ctx: SharedContext,
  query: CallbackQuery,
  dialogue: BotDialogue,
  state: ConversationState,
) -> HandlerResult {
  let user_id = query.from.id.0;
  let callback_data = query.data.as_deref().unwrap_or("<empty>");
  let Some(chat) = query.message.as_ref().map(|message| message.chat().id) else {
    info!(user_id, callback = callback_data, "callback query without message context");
    bot.answer_callback_query(query.id).text(STALE_BUTTON_TEXT).await?;
    return Ok(());
  };
  info!(user_id, chat_id = %chat, callback = callback_data, "handling callback query");

  let action = match callback_data.parse::<CallbackAction>() {
    Ok(action) => action,
    Err(err) => {
      warn!(user_id, chat_id = %chat, error = %err, "rejecting callback query");
      bot.answer_callback_query(query.id).text(STALE_BUTTON_TEXT).await?;
      return Ok(());
    },
  };

  let consumed = state.pending_upload().cloned();
  let result = ctx.flow().on_button(state, action).await;
  if let Err(err) = apply(&bot, &dialogue, chat, consumed, result, Some(&query)).await {
    recover(&bot, &dialogue, chat, err).await;
  }
  Ok(())
}

/// Stores the next state, drops released downloads and delivers the replies.
/// A failed step is turned into an outcome by [`Flow::on_error`] first.
async fn apply(
  bot: &Bot,
  dialogue: &BotDialogue,
  chat: ChatId,
  consumed: Option<PendingUpload>,
  result: Result<Outcome, FlowError>,
  query: Option<&CallbackQuery>,
) -> HandlerResult {
  let outcome = match result {
    Ok(outcome) => outcome,
    Err(err) => {
      warn!(chat_id = %chat, error = %err, "conversation step failed");
      Flow::on_error(&err, consumed)
    },
  };

  let Outcome {
    state,
    replies,
    released,
  } = outcome;
  info!(chat_id = %chat, state = state_name(&state), "conversation advanced");
  if matches!(state, ConversationState::Idle) {
    dialogue.reset().await?;
  } else {
    dialogue.update(state).await?;
  }

  for upload in &released {
    upload.release().await;
  }

  let (notices, replies): (Vec<Reply>, Vec<Reply>) = replies
    .into_iter()
    .partition(|reply| query.is_some() && matches!(reply, Reply::Notice(_)));
  if let Some(query) = query {
    let notice = notices.into_iter().find_map(|reply| match reply {
      Reply::Notice(text) => Some(text),
      _ => None,
    });
    match notice {
      Some(text) => bot.answer_callback_query(query.id.clone()).text(text).await?,
      None => bot.answer_callback_query(query.id.clone()).await?,
    };
  }

  deliver(bot, chat, replies).await
}

async fn deliver(bot: &Bot, chat: ChatId, replies: Vec<Reply>) -> HandlerResult {
  for reply in replies {
    match reply {
      Reply::Notice(text) | Reply::Text(text) => {
        bot.send_message(chat, text).await?;
      },
      Reply::Markdown(text) => {
        bot.send_message(chat, text).parse_mode(ParseMode::MarkdownV2).await?;
      },
      Reply::Choices { text, rows } => {
        bot.send_message(chat, text).reply_markup(keyboard(rows)).await?;
      },
      Reply::Document(upload) => {
        let result = send_with_progress(bot, chat, &upload, None).await;
        upload.release().await;
        result?;
      },
    }
  }
  Ok(())
}

async fn recover(bot: &Bot, dialogue: &BotDialogue, chat: ChatId, err: anyhow::Error) {
  error!(chat_id = %chat, error = %err, "handler failed");
  if let Err(err) = dialogue.reset().await {
    warn!(chat_id = %chat, error = %err, "failed to reset conversation after error");
  }
  if let Err(err) = bot.send_message(chat, GENERIC_FAILURE_TEXT).await {
    warn!(chat_id = %chat, error = %err, "failed to report handler error");
  }
}

fn keyboard(rows: Vec<Vec<Button>>) -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(rows.into_iter().map(|row| {
    row
      .into_iter()
      .map(|button| InlineKeyboardButton::callback(button.label, button.action.to_string()))
      .collect::<Vec<_>>()
  }))
}

/// Sends a downloaded file, editing a status message as the body is streamed.
#[instrument(skip(bot, upload), fields(file_name = upload.display_name()))]
async fn send_with_progress(
  bot: &Bot,
  chat: ChatId,
  upload: &PendingUpload,
  caption: Option<&str>,
) -> HandlerResult {
  let name = upload.display_name().to_string();
  let file = tokio::fs::File::open(&upload.path)
    .await
    .with_context(|| format!("failed to open pending upload {}", upload.path.display()))?;
  let (reader, progress) = ProgressReader::new(file);

  let status = bot.send_message(chat, format!("Uploading {name}: 0%")).await?;
  let reporter = tokio::spawn(report_progress(
    bot.clone(),
    chat,
    status.id,
    name.clone(),
    upload.size,
    progress,
  ));

  let mut request = bot.send_document(chat, InputFile::read(reader).file_name(name.clone()));
  if let Some(caption) = caption {
    request = request.caption(caption.to_string());
  }
  let result = request.await;
  reporter.abort();

  match result {
    Ok(_) => {
      info!(chat_id = %chat, file_name = %name, bytes = upload.size, "sent document");
      if let Err(err) = bot.edit_message_text(chat, status.id, format!("Sent {name}.")).await {
        debug!(error = %err, "failed to finish upload status");
      }
      Ok(())
    },
    Err(err) => {
      if let Err(delete_err) = bot.delete_message(chat, status.id).await {
        debug!(error = %delete_err, "failed to remove upload status");
      }
      Err(err).context("failed to send document")
    },
  }
}

async fn report_progress(
  bot: Bot,
  chat: ChatId,
  status: MessageId,
  name: String,
  total: u64,
  mut progress: watch::Receiver<u64>,
) {
  let mut milestones = Milestones::default();
  while progress.changed().await.is_ok() {
    let sent = *progress.borrow_and_update();
    let Some(mark) = milestones.advance(percent(sent, total)) else {
      continue;
    };
    debug!(chat_id = %chat, file_name = %name, percent = mark, "upload progress");
    if let Err(err) = bot
      .edit_message_text(chat, status, format!("Uploading {name}: {mark}%"))
      .await
    {
      debug!(error = %err, "skipped progress update");
    }
  }
}

fn message_text(msg: &Message) -> Option<&str> {
  msg.text().or_else(|| msg.caption())
}

fn state_name(state: &ConversationState) -> &'static str {
  match state {
    ConversationState::Idle => "idle",
    ConversationState::AwaitingMovieTitleForDetails => "awaiting_movie_title_for_details",
    ConversationState::AwaitingMovieTitleForRating => "awaiting_movie_title_for_rating",
    ConversationState::SelectingMovie { .. } => "selecting_movie",
    ConversationState::AwaitingUrl => "awaiting_url",
    ConversationState::AwaitingNameDecision { .. } => "awaiting_name_decision",
    ConversationState::AwaitingRenameName { .. } => "awaiting_rename_name",
  }
}

#[cfg(test)]
mod tests {
  use super::keyboard;
  use super::state_name;
  use crate::bot::flow::Flow;
  use crate::bot::flow::Reply;
  use crate::bot::state::ConversationState;

  #[test]
  fn welcome_keyboard_uses_typed_payloads() {
    let Reply::Choices { rows, .. } = Flow::welcome() else {
      panic!("welcome must carry buttons");
    };
    let markup = keyboard(rows);
    assert_eq!(markup.inline_keyboard.len(), 3);
    assert_eq!(markup.inline_keyboard[0].len(), 2);
    assert_eq!(markup.inline_keyboard[0][0].text, "Time");
    assert_eq!(markup.inline_keyboard[2][0].text, "URL Upload");
  }

  #[test]
  fn names_states_for_logs() {
    assert_eq!(state_name(&ConversationState::Idle), "idle");
    assert_eq!(state_name(&ConversationState::AwaitingUrl), "awaiting_url");
  }
}
