//! Cross-chain transfer and auction lifecycle tracker
//!
//! Locks tokens on a source chain, retrieves the guardian attestation for the
//! resulting message, completes the transfer on the target chain, and follows
//! externally run auctions until they finish or need a refund.

pub mod api;
pub mod auction;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod guardian;
pub mod metrics;
pub mod transfer;

pub use error::{TrackerError, TrackerResult};
