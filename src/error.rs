//! Error types for QuizzleNet.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuizzleError>;

#[derive(Error, Debug)]
pub enum QuizzleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Translation service error: {reason}")]
    Translation { reason: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl QuizzleError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn translation(reason: impl Into<String>) -> Self {
        Self::Translation {
            reason: reason.into(),
        }
    }
}
