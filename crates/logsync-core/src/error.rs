//! Error types for logsync

use std::time::Duration;

use alloy_primitives::Address;
use thiserror::Error;

use crate::record::EventKey;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Endpoint {url} failed {method}: {reason}")]
    EndpointUnavailable {
        url: String,
        method: &'static str,
        reason: String,
    },

    #[error("{operation} failed after {attempts} endpoint attempt(s): {source}")]
    FailoverExhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Contract {address} has no code at any block up to {head}, check the address")]
    DeploymentNotFound { address: Address, head: u64 },

    #[error("No event stored under key {0}")]
    RecordNotFound(EventKey),

    #[error("Serialization failed for {context}: {reason}")]
    Serialization { context: String, reason: String },

    #[error("Unsupported record format version {found} (expected {expected})")]
    UnsupportedRecordVersion { found: u8, expected: u8 },

    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn serialization(context: impl Into<String>, reason: impl ToString) -> Self {
        Error::Serialization {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that a different endpoint might not reproduce
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            Error::EndpointUnavailable { .. } | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_message_names_operation_and_cause() {
        let err = Error::FailoverExhausted {
            operation: "eth_getLogs [100, 199]".into(),
            attempts: 2,
            source: Box::new(Error::EndpointUnavailable {
                url: "http://b".into(),
                method: "eth_getLogs",
                reason: "connection refused".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("eth_getLogs [100, 199]"));
        assert!(msg.contains("2 endpoint attempt(s)"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_endpoint_failure_classification() {
        let unavailable = Error::EndpointUnavailable {
            url: "http://a".into(),
            method: "eth_blockNumber",
            reason: "503".into(),
        };
        assert!(unavailable.is_endpoint_failure());
        assert!(!Error::Cancelled.is_endpoint_failure());
        assert!(!Error::Storage("disk full".into()).is_endpoint_failure());
    }
}
