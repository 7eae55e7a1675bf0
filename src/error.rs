//! Error types for the cross-chain tracker

use crate::codec::DecodeError;
use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Attestation decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(
        "Attestation for chain {emitter_chain} sequence {sequence} not available after {rounds} rounds"
    )]
    AttestationTimeout {
        emitter_chain: u16,
        sequence: u64,
        rounds: u32,
    },

    #[error("Submission error on chain {chain}: {message}")]
    Submission { chain: u16, message: String },

    #[error("Status query error for order {order_hash}: {message}")]
    StatusQuery { order_hash: String, message: String },

    #[error("Order {order_hash} exceeded its timeout of {timeout_secs}s")]
    OrderTimeout { order_hash: String, timeout_secs: u64 },

    #[error("Guardian endpoint {endpoint} failed: {message}")]
    Endpoint { endpoint: String, message: String },

    #[error("Lock receipt {tx_hash} carries no message publication log")]
    MissingSequence { tx_hash: String },

    #[error("Chain {chain} not configured")]
    ChainNotFound { chain: u16 },

    #[error("Transfer {0} not found")]
    TransferNotFound(String),

    #[error("Auction {0} not found")]
    AuctionNotFound(String),

    #[error("{0} is already being tracked")]
    AlreadyTracked(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Check if error is transient and the operation may be repeated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::StatusQuery { .. } | TrackerError::AttestationTimeout { .. }
        )
    }

    pub fn submission(chain: u16, message: impl Into<String>) -> Self {
        Self::Submission {
            chain,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let status = TrackerError::StatusQuery {
            order_hash: "0xabc".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(status.is_retryable());

        let decode = TrackerError::Decode(DecodeError::TruncatedMessage {
            field: "version",
            needed: 1,
            remaining: 0,
        });
        assert!(!decode.is_retryable());

        let submission = TrackerError::submission(2, "reverted");
        assert!(!submission.is_retryable());
    }

    #[test]
    fn test_order_timeout_message() {
        let err = TrackerError::OrderTimeout {
            order_hash: "0xabc".to_string(),
            timeout_secs: 1800,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Order 0xabc exceeded its timeout of 1800s");
    }
}
