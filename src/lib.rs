//! # ZdravScan client
//!
//! Client for the ZdravScan skin-condition backend: Telegram-based
//! authentication, image submission with status polling, query history,
//! reference literature and subscriptions, plus a Telegram bot host.

pub mod api_errors;
pub mod auth;
pub mod bot;
pub mod client_config;
pub mod history;
pub mod http_client;
pub mod literature;
pub mod localization;
pub mod models;
pub mod router;
pub mod scan_workflow;
pub mod subscription;
pub mod token_store;
