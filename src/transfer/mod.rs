//! Transfer orchestrator
//!
//! Moves one transfer at a time through
//! `Locked -> AwaitingAttestation -> AttestationReady -> Completed`, with any
//! non-terminal state able to drop to `Failed`:
//! - The lock receipt yields the message sequence
//! - The guardian client yields the signed attestation
//! - The target chain's token bridge redeems it
//!
//! Attestation waiting blocks for minutes; callers that need to stay
//! responsive use `spawn_tracking` and observe progress on the event bus.

mod orchestrator;
mod state;

pub use orchestrator::TransferOrchestrator;
pub use state::{FailureReason, Transfer, TransferKey, TransferRequest, TransferState};
