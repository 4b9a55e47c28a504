//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: Handles commands, photos and image documents
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `ui_builder`: Creates keyboards and formats messages
//! - `session_manager`: Keeps one backend session per chat

pub mod callback_handler;
pub mod message_handler;
pub mod session_manager;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

pub use session_manager::{ChatContext, SessionRegistry};
