//! # API Error Types Module
//!
//! This module defines the error taxonomy shared by the HTTP client, the auth
//! session and the scan workflow.

use thiserror::Error;

/// Custom error types for backend API operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// No response at all (connection refused, DNS failure, timeout)
    #[error("Transport error: {0}")]
    Transport(String),
    /// Non-2xx response with a parsed or fallback message
    #[error("Request failed ({status}): {message}")]
    Request { status: u16, message: String },
    /// Authentication endpoint rejected the credentials, or no session
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Image submission failed
    #[error("Upload error: {0}")]
    Upload(String),
    /// Response body could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),
    /// Input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),
    /// Backend violated the scan status protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Token storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Whether the error means no response was received at all
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// HTTP status of a failed request, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the backend rejected the bearer token
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
