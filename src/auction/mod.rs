//! Auction tracker
//!
//! Follows externally managed orders by polling their coarse status and
//! mapping it onto a finer state machine:
//! - Registration announces the order right away
//! - Every state change is published on the state's topic and `auction_update`
//! - A wall-clock timeout from registration forces `Expired` and raises
//!   `refund_needed` exactly once
//!
//! Treating `executing` with fills as `EscrowDeposited` is an approximation:
//! the status feed does not say which fill funded the escrow.

mod state;
mod status;
mod tracker;

pub use state::{next_state, Auction, AuctionState, ResolverInfo};
pub use status::{HttpStatusSource, OrderFill, OrderStatus, OrderStatusSource};
pub use tracker::AuctionTracker;
