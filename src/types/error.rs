//! Unified error type for the relay, the training loop and the dashboard API
//!
//! Errors are serializable so the dashboard can render them as JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum MailsortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Mailbox error: {0}")]
    Backend(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for MailsortError {
    fn from(err: std::io::Error) -> Self {
        MailsortError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MailsortError {
    fn from(err: toml::de::Error) -> Self {
        MailsortError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MailsortError {
    fn from(err: serde_json::Error) -> Self {
        MailsortError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for MailsortError {
    fn from(err: rusqlite::Error) -> Self {
        MailsortError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for MailsortError {
    fn from(err: r2d2::Error) -> Self {
        MailsortError::Database(format!("Connection pool: {}", err))
    }
}

impl From<async_imap::error::Error> for MailsortError {
    fn from(err: async_imap::error::Error) -> Self {
        MailsortError::Backend(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for MailsortError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MailsortError::Relay(err.to_string())
    }
}

impl From<lettre::address::AddressError> for MailsortError {
    fn from(err: lettre::address::AddressError) -> Self {
        MailsortError::InvalidInput(format!("Invalid address: {}", err))
    }
}

impl From<lettre::error::Error> for MailsortError {
    fn from(err: lettre::error::Error) -> Self {
        MailsortError::Relay(err.to_string())
    }
}

impl From<mailparse::MailParseError> for MailsortError {
    fn from(err: mailparse::MailParseError) -> Self {
        MailsortError::Parse(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MailsortError {
    fn from(err: tokio::task::JoinError) -> Self {
        MailsortError::Other(format!("Background task failed: {}", err))
    }
}

impl From<String> for MailsortError {
    fn from(err: String) -> Self {
        MailsortError::Other(err)
    }
}

impl From<&str> for MailsortError {
    fn from(err: &str) -> Self {
        MailsortError::Other(err.to_string())
    }
}

/// Result type alias using MailsortError
pub type Result<T> = std::result::Result<T, MailsortError>;
