//! Error types for the Device42 client

use d42inv_core::{InventoryError, RecordKind};
use thiserror::Error;

/// Errors that can occur when talking to Device42
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV decoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// API returned an error status
    #[error("API error ({status}) for {url}: {message}")]
    Api {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No stored password for the device/user pair
    #[error("no password found for user {username} on device {device}")]
    CredentialNotFound {
        /// Device name
        device: String,
        /// Account name
        username: String,
    },

    /// More than one stored password for the device/user pair
    #[error("{count} passwords found for user {username} on device {device}")]
    AmbiguousCredential {
        /// Device name
        device: String,
        /// Account name
        username: String,
        /// Number of matches
        count: usize,
    },
}

impl ClientError {
    /// Convert into the core error for a fetch of `kind`
    #[must_use]
    pub fn into_inventory_error(self, kind: RecordKind) -> InventoryError {
        match self {
            ClientError::Api {
                url,
                status,
                message,
            } => InventoryError::Transport {
                url,
                status: Some(status),
                message,
            },
            ClientError::Http(e) => InventoryError::Transport {
                url: e.url().map(ToString::to_string).unwrap_or_default(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            ClientError::Url(e) => InventoryError::Transport {
                url: String::new(),
                status: None,
                message: e.to_string(),
            },
            other => InventoryError::Decode {
                kind,
                message: other.to_string(),
            },
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
