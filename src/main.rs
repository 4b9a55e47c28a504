use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zdravscan::bot::{self, SessionRegistry};
use zdravscan::client_config::ClientConfig;
use zdravscan::localization::init_localization;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging; LOG_FORMAT=json switches to machine-readable output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting ZdravScan Telegram Bot");

    init_localization().context("Failed to load localization resources")?;

    // Get bot token from environment
    let bot_token = env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

    let config = ClientConfig::from_env();
    info!(
        api_url = %config.api_url,
        data_dir = %config.data_dir.display(),
        poll_attempts = config.poll.max_attempts,
        "Client configuration loaded"
    );
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let registry = Arc::new(SessionRegistry::new(config));

    // Initialize the bot
    let bot = Bot::new(bot_token);

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(bot::message_handler))
        .branch(Update::filter_callback_query().endpoint(bot::callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![registry])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
