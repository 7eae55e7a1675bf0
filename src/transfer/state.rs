//! Transfer state machine and record types

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Global lookup key of a transfer once its sequence is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub source_chain: u16,
    pub sequence: u64,
}

impl TransferKey {
    pub fn new(source_chain: u16, sequence: u64) -> Self {
        Self {
            source_chain,
            sequence,
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_chain, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Lock transaction confirmed on the source chain
    Locked,
    AwaitingAttestation,
    AttestationReady,
    Completed,
    Failed,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Locked => "locked",
            TransferState::AwaitingAttestation => "awaiting_attestation",
            TransferState::AttestationReady => "attestation_ready",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    /// Forward-only transitions; any non-terminal state may fail
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Locked, AwaitingAttestation) => true,
            (AwaitingAttestation, AttestationReady) => true,
            (AttestationReady, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transfer ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Lock receipt or attestation could not be interpreted
    Decode(String),
    AttestationTimeout,
    /// Completion was mined but reverted
    CompletionReverted,
    Submission(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Decode(msg) => write!(f, "decode error: {}", msg),
            FailureReason::AttestationTimeout => f.write_str("attestation timeout"),
            FailureReason::CompletionReverted => f.write_str("completion reverted"),
            FailureReason::Submission(msg) => write!(f, "submission error: {}", msg),
        }
    }
}

/// Caller's request to move tokens between chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_chain: u16,
    pub target_chain: u16,
    pub token: Address,
    pub amount: U256,
    /// Recipient on the target chain, left-padded to 32 bytes
    pub recipient: H256,
    #[serde(default)]
    pub arbiter_fee: U256,
    #[serde(default)]
    pub nonce: u32,
}

/// One tracked cross-chain transfer
#[derive(Debug, Clone, Serialize)]
pub struct Transfer {
    pub id: Uuid,
    pub source_chain: u16,
    pub target_chain: u16,
    /// Unknown for transfers resumed from a sequence
    pub token: Option<Address>,
    pub amount: Option<U256>,
    pub recipient: Option<H256>,
    pub lock_tx_hash: Option<H256>,
    pub emitter: Option<H256>,
    pub sequence: Option<u64>,
    pub state: TransferState,
    pub failure: Option<FailureReason>,
    /// Raw signed attestation once fetched
    #[serde(skip)]
    pub attestation: Option<Vec<u8>>,
    /// Double-keccak digest of the attestation body
    pub attestation_digest: Option<H256>,
    pub completion_tx_hash: Option<H256>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub(crate) fn locked(request: &TransferRequest, lock_tx_hash: H256) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_chain: request.source_chain,
            target_chain: request.target_chain,
            token: Some(request.token),
            amount: Some(request.amount),
            recipient: Some(request.recipient),
            lock_tx_hash: Some(lock_tx_hash),
            emitter: None,
            sequence: None,
            state: TransferState::Locked,
            failure: None,
            attestation: None,
            attestation_digest: None,
            completion_tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn resumed(
        source_chain: u16,
        target_chain: u16,
        emitter: [u8; 32],
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_chain,
            target_chain,
            token: None,
            amount: None,
            recipient: None,
            lock_tx_hash: None,
            emitter: Some(H256::from(emitter)),
            sequence: Some(sequence),
            state: TransferState::AwaitingAttestation,
            failure: None,
            attestation: None,
            attestation_digest: None,
            completion_tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> Option<TransferKey> {
        self.sequence
            .map(|sequence| TransferKey::new(self.source_chain, sequence))
    }

    /// Last known error reason
    pub fn last_error(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}
