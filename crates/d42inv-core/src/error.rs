//! Error types for d42inv-core

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{DeviceId, RecordKind};

/// Errors that can occur while building an inventory
#[derive(Error, Debug, Clone)]
pub enum InventoryError {
    /// The data source answered with a non-success status or could not be reached
    #[error("transport failure for {url}: {message}")]
    Transport {
        /// Endpoint that failed
        url: String,
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Error message or response body
        message: String,
    },

    /// The data source answered but the body could not be decoded
    #[error("failed to decode {kind} records: {message}")]
    Decode {
        /// Record kind being fetched
        kind: RecordKind,
        /// Decoder error
        message: String,
    },

    /// The fetch phase did not complete in time
    #[error("fetch phase timed out after {0:?}")]
    Timeout(Duration),

    /// A primary row without a usable identifier (strict mode only)
    #[error("malformed {kind} row: {reason}")]
    MalformedRow {
        /// Record kind of the offending row
        kind: RecordKind,
        /// Why the row was rejected
        reason: String,
    },

    /// A device without the configured grouping field (strict mode only)
    #[error("device {device} has no field {field:?}")]
    MissingGroupField {
        /// Offending device
        device: DeviceId,
        /// Configured grouping field
        field: String,
    },

    /// Writing an inventory output failed
    #[error("output error: {0}")]
    Output(String),
}

/// What to do with a record that cannot be processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Skip the record, count it and keep going
    #[default]
    Recover,
    /// Abort the whole run on the first malformed record
    Strict,
}

impl InventoryError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            InventoryError::Transport { status, .. } => {
                status.is_none_or(|code| code >= 500 || code == 429)
            }
            InventoryError::Timeout(_) => true,
            _ => false,
        }
    }

    /// HTTP status carried by a transport failure
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            InventoryError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let server = InventoryError::Transport {
            url: "https://d42/services/data/v1.0/query/".to_string(),
            status: Some(503),
            message: "unavailable".to_string(),
        };
        let auth = InventoryError::Transport {
            url: "https://d42/services/data/v1.0/query/".to_string(),
            status: Some(401),
            message: "unauthorized".to_string(),
        };
        assert!(server.is_retryable());
        assert!(!auth.is_retryable());
        assert!(InventoryError::Timeout(Duration::from_secs(1)).is_retryable());
        assert_eq!(auth.status(), Some(401));
    }

    #[test]
    fn test_transport_message_names_url() {
        let err = InventoryError::Transport {
            url: "https://d42/api/1.0/devices/all/".to_string(),
            status: Some(500),
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("https://d42/api/1.0/devices/all/"));
    }
}
