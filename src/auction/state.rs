//! Auction state machine and external status mapping

use super::status::OrderStatus;

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionState {
    Pending,
    Announced,
    InAuction,
    ResolverSelected,
    EscrowDeposited,
    SecretRevealing,
    Executing,
    Completed,
    Failed,
    Expired,
    Refunding,
    Refunded,
}

impl AuctionState {
    /// Topic name for events about this state
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionState::Pending => "pending",
            AuctionState::Announced => "announced",
            AuctionState::InAuction => "in_auction",
            AuctionState::ResolverSelected => "resolver_selected",
            AuctionState::EscrowDeposited => "escrow_deposited",
            AuctionState::SecretRevealing => "secret_revealing",
            AuctionState::Executing => "executing",
            AuctionState::Completed => "completed",
            AuctionState::Failed => "failed",
            AuctionState::Expired => "expired",
            AuctionState::Refunding => "refunding",
            AuctionState::Refunded => "refunded",
        }
    }

    /// Polling stops once one of these is reached
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuctionState::Completed
                | AuctionState::Failed
                | AuctionState::Expired
                | AuctionState::Refunded
        )
    }

    /// Transitions driven by the tracker itself rather than by polled status
    pub fn can_transition_to(&self, next: AuctionState) -> bool {
        use AuctionState::*;
        match (*self, next) {
            (Pending, Announced) => true,
            (EscrowDeposited, SecretRevealing) => true,
            (Expired | Failed, Refunding) => true,
            (Refunding, Refunded) => true,
            (current, Expired) => !current.is_terminal() && current != Refunding,
            _ => false,
        }
    }
}

impl fmt::Display for AuctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an external status onto the next internal state.
///
/// Returns `None` when nothing should change: unrecognized status, the same
/// state again, or an auction the status source no longer drives. A
/// `SecretRevealing` auction only accepts terminal statuses.
pub fn next_state(current: AuctionState, status: &OrderStatus) -> Option<AuctionState> {
    if current.is_terminal() || current == AuctionState::Refunding {
        return None;
    }

    let mapped = match status.status.as_str() {
        "pending" => AuctionState::Announced,
        "in_auction" => AuctionState::InAuction,
        "resolver_selected" => AuctionState::ResolverSelected,
        // Fills are taken to mean the resolver's escrow is funded
        "executing" if status.fills.is_empty() => AuctionState::Executing,
        "executing" => AuctionState::EscrowDeposited,
        "completed" => AuctionState::Completed,
        "failed" => AuctionState::Failed,
        "expired" => AuctionState::Expired,
        _ => return None,
    };

    if current == AuctionState::SecretRevealing && !mapped.is_terminal() {
        return None;
    }

    (mapped != current).then_some(mapped)
}

/// Resolver that won the auction. Never cleared once set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverInfo {
    pub address: String,
    pub bid_amount: Option<U256>,
    pub reputation: Option<f64>,
    pub estimated_time_secs: Option<u64>,
    pub deposit_tx_hash: Option<String>,
}

impl ResolverInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            bid_amount: None,
            reputation: None,
            estimated_time_secs: None,
            deposit_tx_hash: None,
        }
    }
}

/// One tracked order
#[derive(Debug, Clone, Serialize)]
pub struct Auction {
    pub order_hash: String,
    pub state: AuctionState,
    pub resolver: Option<ResolverInfo>,
    /// Raw status from the most recent successful poll
    pub last_status: Option<String>,
    pub reason: Option<String>,
    pub refund_tx_hash: Option<String>,
    pub timeout_secs: u64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic start of the timeout clock
    #[serde(skip)]
    pub(crate) started: Instant,
}

impl Auction {
    pub(crate) fn new(order_hash: &str, timeout_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            order_hash: order_hash.to_string(),
            state: AuctionState::Pending,
            resolver: None,
            last_status: None,
            reason: None,
            refund_tx_hash: None,
            timeout_secs,
            registered_at: now,
            updated_at: now,
            started: Instant::now(),
        }
    }

    /// Fill in resolver details carried by a status update
    pub(crate) fn absorb(&mut self, status: &OrderStatus) {
        if self.resolver.is_none() {
            if let Some(address) = &status.resolver {
                self.resolver = Some(ResolverInfo::new(address.clone()));
            }
        }

        if let Some(resolver) = self.resolver.as_mut() {
            if resolver.deposit_tx_hash.is_none() {
                resolver.deposit_tx_hash = status.fills.iter().find_map(|f| f.tx_hash.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::status::OrderFill;

    fn status(value: &str, fills: usize) -> OrderStatus {
        OrderStatus {
            status: value.to_string(),
            resolver: None,
            fills: (0..fills)
                .map(|i| OrderFill {
                    tx_hash: Some(format!("0xfill{}", i)),
                    amount: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_status_mapping_table() {
        use AuctionState::*;
        let cases = [
            ("pending", 0, Announced),
            ("in_auction", 0, InAuction),
            ("resolver_selected", 0, ResolverSelected),
            ("executing", 0, Executing),
            ("executing", 2, EscrowDeposited),
            ("completed", 0, Completed),
            ("failed", 0, Failed),
            ("expired", 0, Expired),
        ];

        for (value, fills, expected) in cases {
            assert_eq!(
                next_state(Pending, &status(value, fills)),
                Some(expected),
                "status {} with {} fills",
                value,
                fills
            );
        }
    }

    #[test]
    fn test_unchanged_or_unknown_status_is_ignored() {
        use AuctionState::*;
        assert_eq!(next_state(Announced, &status("pending", 0)), None);
        assert_eq!(next_state(InAuction, &status("bidding", 0)), None);
        assert_eq!(next_state(Completed, &status("failed", 0)), None);
        assert_eq!(next_state(Refunding, &status("in_auction", 0)), None);
    }

    #[test]
    fn test_secret_revealing_only_accepts_terminal_status() {
        use AuctionState::*;
        assert_eq!(next_state(SecretRevealing, &status("executing", 1)), None);
        assert_eq!(next_state(SecretRevealing, &status("in_auction", 0)), None);
        assert_eq!(next_state(SecretRevealing, &status("completed", 0)), Some(Completed));
    }

    #[test]
    fn test_tracker_driven_transitions() {
        use AuctionState::*;
        assert!(Pending.can_transition_to(Announced));
        assert!(InAuction.can_transition_to(Expired));
        assert!(EscrowDeposited.can_transition_to(SecretRevealing));
        assert!(Expired.can_transition_to(Refunding));
        assert!(Failed.can_transition_to(Refunding));
        assert!(Refunding.can_transition_to(Refunded));

        assert!(!Completed.can_transition_to(Refunding));
        assert!(!Completed.can_transition_to(Expired));
        assert!(!Refunding.can_transition_to(Expired));
        assert!(!Executing.can_transition_to(SecretRevealing));
    }

    #[tokio::test]
    async fn test_resolver_is_populated_once() {
        let mut auction = Auction::new("0xabc", 60);

        let mut selected = status("resolver_selected", 0);
        selected.resolver = Some("0xresolver".to_string());
        auction.absorb(&selected);
        assert_eq!(auction.resolver.as_ref().unwrap().address, "0xresolver");

        let mut other = status("executing", 1);
        other.resolver = Some("0xsomeone_else".to_string());
        auction.absorb(&other);

        let resolver = auction.resolver.unwrap();
        assert_eq!(resolver.address, "0xresolver");
        assert_eq!(resolver.deposit_tx_hash.as_deref(), Some("0xfill0"));
    }
}
