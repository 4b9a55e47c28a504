//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, error, info, warn};

// Import localization
use crate::localization::{t_args_lang, t_lang};

// Import domain types
use crate::api_errors::ApiError;
use crate::history::DEFAULT_HISTORY_PAGE;
use crate::http_client::LiteratureFilter;
use crate::literature::DEFAULT_SEARCH_LIMIT;
use crate::models::ImageFile;
use crate::router::Page;

// Import session types
use super::session_manager::{ChatContext, SessionRegistry};

// Import UI builder functions
use super::ui_builder::{
    create_categories_keyboard, create_literature_keyboard, create_plans_keyboard,
    create_retry_keyboard, create_subscription_keyboard, format_history, format_literature,
    format_plans, format_search_results, format_subscription_status, render_page,
};

/// Download a Telegram file into memory
pub async fn download_file(bot: &Bot, file_id: teloxide::types::FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );

    let response = reqwest::get(&url).await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

pub async fn message_handler(bot: Bot, msg: Message, registry: Arc<SessionRegistry>) -> Result<()> {
    let language_code = msg
        .from
        .as_ref()
        .and_then(|u| u.language_code.as_ref())
        .map(|s| s.as_str());

    let Some(user) = msg.from.as_ref() else {
        debug!(chat_id = %msg.chat.id, "Ignoring message without a sender");
        return Ok(());
    };

    let context = match registry.context_for(msg.chat.id, user).await {
        Ok(context) => context,
        Err(e) => {
            error!(user_id = %msg.chat.id, error = %e, "Failed to create chat session");
            bot.send_message(msg.chat.id, t_lang("error-session", language_code))
                .await?;
            return Ok(());
        }
    };

    if let Some(photos) = msg.photo() {
        debug!(user_id = %msg.chat.id, photo_count = photos.len(), "Received photo message from user");
        // Telegram sends several sizes; the last one is the largest
        if let Some(largest_photo) = photos.last() {
            let file = ImageFileSource {
                file_id: largest_photo.file.id.clone(),
                file_name: format!("photo_{}.jpg", msg.id.0),
                mime_type: "image/jpeg".to_string(),
            };
            handle_image(&bot, &msg, context, file, language_code).await?;
        }
    } else if let Some(doc) = msg.document() {
        let mime_type = doc.mime_type.as_ref().map(|m| m.essence_str().to_string());
        match mime_type {
            Some(mime_type) if mime_type.starts_with("image/") => {
                debug!(user_id = %msg.chat.id, mime_type = %mime_type, "Received image document from user");
                let file = ImageFileSource {
                    file_id: doc.file.id.clone(),
                    file_name: doc
                        .file_name
                        .clone()
                        .unwrap_or_else(|| format!("document_{}", msg.id.0)),
                    mime_type,
                };
                handle_image(&bot, &msg, context, file, language_code).await?;
            }
            _ => {
                warn!(user_id = %msg.chat.id, "Unsupported document type rejected");
                bot.send_message(msg.chat.id, t_lang("error-unsupported-format", language_code))
                    .await?;
            }
        }
    } else if let Some(text) = msg.text() {
        handle_text_message(&bot, &msg, &context, text, language_code).await?;
    } else {
        bot.send_message(msg.chat.id, t_lang("unsupported-message", language_code))
            .await?;
    }

    Ok(())
}

struct ImageFileSource {
    file_id: teloxide::types::FileId,
    file_name: String,
    mime_type: String,
}

async fn handle_image(
    bot: &Bot,
    msg: &Message,
    context: Arc<ChatContext>,
    source: ImageFileSource,
    language_code: Option<&str>,
) -> Result<()> {
    let bytes = match download_file(bot, source.file_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(user_id = %msg.chat.id, error = %e, "Failed to download image for user");
            bot.send_message(msg.chat.id, t_lang("error-download-failed", language_code))
                .await?;
            return Ok(());
        }
    };
    info!(user_id = %msg.chat.id, size = bytes.len(), "Image downloaded");

    let file = ImageFile::new(source.file_name, source.mime_type, bytes);
    context.remember_image(file.clone());
    start_scan(bot, msg.chat.id, context, file, language_code).await
}

/// Start a scan for `file` and report its outcome when it finishes.
///
/// A newer scan in the same chat supersedes this one; a superseded scan
/// reports nothing.
pub async fn start_scan(
    bot: &Bot,
    chat_id: ChatId,
    context: Arc<ChatContext>,
    file: ImageFile,
    language_code: Option<&str>,
) -> Result<()> {
    if !context.ensure_authenticated().await {
        bot.send_message(chat_id, t_lang("error-auth-failed", language_code))
            .await?;
        return Ok(());
    }

    if let Err(e) = context.workflow.validate(&file) {
        warn!(user_id = %chat_id, error = %e, "Image rejected before upload");
        bot.send_message(chat_id, t_lang("error-unsupported-format", language_code))
            .await?;
        return Ok(());
    }

    let handle = context.workflow.start(file);
    let phase = context.workflow.phase();
    context.navigate(|nav| {
        nav.follow(&phase);
    });
    bot.send_message(chat_id, t_lang("scan-started", language_code))
        .await?;

    let bot = bot.clone();
    let language_code = language_code.map(str::to_string);
    tokio::spawn(async move {
        let language_code = language_code.as_deref();
        let Some(outcome) = handle.outcome().await else {
            debug!(user_id = %chat_id, "Scan superseded or cancelled");
            return;
        };

        let page = context.finish_scan(&outcome);
        let Some(text) = render_page(&page, language_code) else {
            return;
        };

        let mut request = bot.send_message(chat_id, text);
        if outcome.is_retryable() {
            request = request.reply_markup(create_retry_keyboard(language_code));
        }
        if let Err(e) = request.await {
            error!(user_id = %chat_id, error = %e, "Failed to deliver scan outcome");
        }
    });

    Ok(())
}

async fn handle_text_message(
    bot: &Bot,
    msg: &Message,
    context: &ChatContext,
    text: &str,
    language_code: Option<&str>,
) -> Result<()> {
    debug!(user_id = %msg.chat.id, message_length = text.len(), "Received text message from user");

    let (command, argument) = match text.trim().split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (text.trim(), ""),
    };
    // Commands in groups arrive as /command@botname
    let command = command.split('@').next().unwrap_or(command);

    match command {
        "/start" => {
            context.navigate(|nav| nav.navigate(Page::Home));
            let name = context
                .session
                .user()
                .map(|u| u.display_name())
                .unwrap_or_default();
            let welcome = t_args_lang("welcome", &[("name", name.as_str())], language_code);
            bot.send_message(msg.chat.id, welcome).await?;
        }
        "/help" => {
            bot.send_message(msg.chat.id, t_lang("help", language_code))
                .await?;
        }
        "/history" => send_history(bot, msg.chat.id, context, language_code).await?,
        "/clear_history" => {
            context.ensure_authenticated().await;
            let key = match context.history.clear().await {
                Ok(true) => "history-cleared",
                Ok(false) => "error-auth-failed",
                Err(e) => {
                    error!(user_id = %msg.chat.id, error = %e, "Failed to clear history");
                    "error-request"
                }
            };
            bot.send_message(msg.chat.id, t_lang(key, language_code))
                .await?;
        }
        "/literature" => {
            context.navigate(|nav| nav.navigate(Page::Literature));
            send_literature(bot, msg.chat.id, context, argument, language_code).await?
        }
        "/categories" => match context.literature.categories().await {
            Ok(categories) if !categories.is_empty() => {
                bot.send_message(msg.chat.id, t_lang("categories-title", language_code))
                    .reply_markup(create_categories_keyboard(&categories))
                    .await?;
            }
            Ok(_) => {
                bot.send_message(msg.chat.id, t_lang("literature-empty", language_code))
                    .await?;
            }
            Err(e) => send_api_error(bot, msg.chat.id, &e, language_code).await?,
        },
        "/subscription" => {
            context.navigate(|nav| nav.navigate(Page::Subscription));
            context.ensure_authenticated().await;
            match context.subscriptions.status().await {
                Ok(status) => {
                    let mut request = bot.send_message(
                        msg.chat.id,
                        format_subscription_status(&status, language_code),
                    );
                    if let Some(keyboard) = create_subscription_keyboard(&status, language_code) {
                        request = request.reply_markup(keyboard);
                    }
                    request.await?;
                }
                Err(e) => send_api_error(bot, msg.chat.id, &e, language_code).await?,
            }
        }
        "/plans" => match context.subscriptions.plans().await {
            Ok(plans) => {
                bot.send_message(msg.chat.id, format_plans(&plans, language_code))
                    .reply_markup(create_plans_keyboard(&plans))
                    .await?;
            }
            Err(e) => send_api_error(bot, msg.chat.id, &e, language_code).await?,
        },
        "/logout" => {
            context.workflow.cancel_active();
            context.session.logout();
            context.navigate(|nav| nav.navigate(Page::Home));
            info!(user_id = %msg.chat.id, "User logged out");
            bot.send_message(msg.chat.id, t_lang("logged-out", language_code))
                .await?;
        }
        _ => {
            bot.send_message(msg.chat.id, t_lang("text-response", language_code))
                .await?;
        }
    }

    Ok(())
}

pub async fn send_history(
    bot: &Bot,
    chat_id: ChatId,
    context: &ChatContext,
    language_code: Option<&str>,
) -> Result<()> {
    context.navigate(|nav| nav.navigate(Page::History));
    context.ensure_authenticated().await;
    match context.history.load(DEFAULT_HISTORY_PAGE).await {
        Ok(page) => {
            bot.send_message(chat_id, format_history(&page, language_code))
                .await?;
        }
        Err(e) => send_api_error(bot, chat_id, &e, language_code).await?,
    }
    Ok(())
}

/// List literature, or search it when `query` is given
pub async fn send_literature(
    bot: &Bot,
    chat_id: ChatId,
    context: &ChatContext,
    query: &str,
    language_code: Option<&str>,
) -> Result<()> {
    if query.is_empty() {
        match context.literature.list(&LiteratureFilter::default()).await {
            Ok(page) => {
                let keyboard = create_literature_keyboard(
                    page.literature.iter().map(|item| (item.id, item.title.as_str())),
                );
                bot.send_message(chat_id, format_literature(&page, language_code))
                    .reply_markup(keyboard)
                    .await?;
            }
            Err(e) => send_api_error(bot, chat_id, &e, language_code).await?,
        }
        return Ok(());
    }

    match context.literature.search(query, DEFAULT_SEARCH_LIMIT).await {
        Ok(results) => {
            let keyboard = create_literature_keyboard(
                results.results.iter().map(|hit| (hit.id, hit.title.as_str())),
            );
            bot.send_message(chat_id, format_search_results(&results, language_code))
                .reply_markup(keyboard)
                .await?;
        }
        Err(ApiError::Validation(_)) => {
            bot.send_message(chat_id, t_lang("literature-query-too-short", language_code))
                .await?;
        }
        Err(e) => send_api_error(bot, chat_id, &e, language_code).await?,
    }
    Ok(())
}

pub async fn send_api_error(
    bot: &Bot,
    chat_id: ChatId,
    error: &ApiError,
    language_code: Option<&str>,
) -> Result<()> {
    warn!(user_id = %chat_id, error = %error, "Backend request failed");
    let text = match error {
        ApiError::Auth(_) => t_lang("error-auth-failed", language_code),
        e if e.is_unauthorized() => t_lang("error-auth-failed", language_code),
        e => t_args_lang("error-request-detail", &[("error", e.to_string().as_str())], language_code),
    };
    bot.send_message(chat_id, text).await?;
    Ok(())
}
