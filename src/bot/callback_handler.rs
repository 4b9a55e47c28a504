//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, info, warn};

// Import localization
use crate::localization::{t_args_lang, t_lang};

// Import domain types
use crate::http_client::LiteratureFilter;
use crate::models::SubscriptionType;

// Import session and message helpers
use super::message_handler::{send_api_error, start_scan};
use super::session_manager::SessionRegistry;

// Import UI builder functions
use super::ui_builder::{
    create_literature_keyboard, format_literature, CANCEL_SUBSCRIPTION_PREFIX, CATEGORY_PREFIX,
    LITERATURE_PREFIX, PLAN_PREFIX, RETRY_SCAN,
};

/// Telegram caps message length at 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: teloxide::types::CallbackQuery,
    registry: Arc<SessionRegistry>,
) -> Result<()> {
    debug!(user_id = %q.from.id, "Received callback query from user");

    // Stop the client-side spinner whatever happens next
    bot.answer_callback_query(q.id.clone()).await?;

    let language_code = q.from.language_code.as_deref();
    let data = q.data.as_deref().unwrap_or("");
    let Some(msg) = &q.message else {
        debug!(user_id = %q.from.id, "Callback without a message, ignoring");
        return Ok(());
    };
    let chat_id = msg.chat().id;

    let context = registry.context_for(chat_id, &q.from).await?;

    if data == RETRY_SCAN {
        match context.last_image() {
            Some(file) => {
                info!(user_id = %chat_id, "Retrying scan with the last image");
                start_scan(&bot, chat_id, Arc::clone(&context), file, language_code).await?;
            }
            None => {
                bot.send_message(chat_id, t_lang("scan-retry-unavailable", language_code))
                    .await?;
            }
        }
    } else if let Some(category) = data.strip_prefix(CATEGORY_PREFIX) {
        let filter = LiteratureFilter {
            category: Some(category.to_string()),
            ..LiteratureFilter::default()
        };
        match context.literature.list(&filter).await {
            Ok(page) => {
                let keyboard = create_literature_keyboard(
                    page.literature.iter().map(|item| (item.id, item.title.as_str())),
                );
                bot.send_message(chat_id, format_literature(&page, language_code))
                    .reply_markup(keyboard)
                    .await?;
            }
            Err(e) => send_api_error(&bot, chat_id, &e, language_code).await?,
        }
    } else if let Some(id) = data.strip_prefix(LITERATURE_PREFIX) {
        let Ok(id) = id.parse::<i64>() else {
            warn!(user_id = %chat_id, data, "Malformed literature callback");
            return Ok(());
        };
        match context.literature.detail(id).await {
            Ok(detail) => {
                let text: String = format!("📖 {}\n\n{}", detail.title, detail.content)
                    .chars()
                    .take(MAX_MESSAGE_CHARS)
                    .collect();
                bot.send_message(chat_id, text).await?;
            }
            Err(e) => send_api_error(&bot, chat_id, &e, language_code).await?,
        }
    } else if let Some(plan) = data.strip_prefix(PLAN_PREFIX) {
        let Some(kind) = SubscriptionType::parse(plan) else {
            warn!(user_id = %chat_id, data, "Unknown subscription plan");
            return Ok(());
        };
        context.ensure_authenticated().await;
        match context.subscriptions.create(kind).await {
            Ok(subscription) => {
                let days = subscription.days_remaining.to_string();
                let text = t_args_lang(
                    "subscription-created",
                    &[("plan", kind.as_str()), ("days", days.as_str())],
                    language_code,
                );
                bot.send_message(chat_id, text).await?;
            }
            Err(e) => send_api_error(&bot, chat_id, &e, language_code).await?,
        }
    } else if let Some(id) = data.strip_prefix(CANCEL_SUBSCRIPTION_PREFIX) {
        let Ok(id) = id.parse::<i64>() else {
            warn!(user_id = %chat_id, data, "Malformed subscription callback");
            return Ok(());
        };
        context.ensure_authenticated().await;
        match context.subscriptions.cancel(id).await {
            Ok(()) => {
                bot.send_message(chat_id, t_lang("subscription-cancelled", language_code))
                    .await?;
            }
            Err(e) => send_api_error(&bot, chat_id, &e, language_code).await?,
        }
    } else {
        warn!(user_id = %chat_id, data, "Unknown callback data");
    }

    Ok(())
}
