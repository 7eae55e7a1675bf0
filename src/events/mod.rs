//! In-process event bus and the event payloads published on it
//!
//! Trackers publish every state change here. Consumers (API, logging, refund
//! handlers) subscribe per topic and never see raw lower-level errors, only
//! the resulting state and a reason string where one exists.

mod bus;

pub use bus::{EventBus, EventHandler, PublishReport, SubscriptionId};

use crate::auction::{AuctionState, ResolverInfo};
use crate::transfer::{TransferKey, TransferState};

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use uuid::Uuid;

/// Topic carrying every auction state change
pub const AUCTION_UPDATE: &str = "auction_update";
/// Topic raised when an order timed out and needs a refund
pub const REFUND_NEEDED: &str = "refund_needed";
/// Topic carrying every transfer state change
pub const TRANSFER_UPDATE: &str = "transfer_update";

/// Events published by the trackers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Auction moved to a new state
    AuctionStateChanged {
        order_hash: String,
        previous: AuctionState,
        state: AuctionState,
        resolver: Option<ResolverInfo>,
        reason: Option<String>,
    },

    /// Auction timed out and the maker's funds must be recovered
    RefundNeeded { order_hash: String },

    /// Transfer moved to a new state
    TransferStateChanged {
        transfer_id: Uuid,
        key: Option<TransferKey>,
        lock_tx_hash: Option<H256>,
        previous: Option<TransferState>,
        state: TransferState,
        reason: Option<String>,
    },
}

impl TrackerEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            TrackerEvent::AuctionStateChanged { .. } => "auction_state_changed",
            TrackerEvent::RefundNeeded { .. } => "refund_needed",
            TrackerEvent::TransferStateChanged { .. } => "transfer_state_changed",
        }
    }

    /// Whether the event reports a terminal state
    pub fn is_terminal(&self) -> bool {
        match self {
            TrackerEvent::AuctionStateChanged { state, .. } => state.is_terminal(),
            TrackerEvent::RefundNeeded { .. } => false,
            TrackerEvent::TransferStateChanged { state, .. } => state.is_terminal(),
        }
    }
}

/// An event as delivered to a handler
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub topic: String,
    pub published_at: DateTime<Utc>,
    pub event: TrackerEvent,
}
