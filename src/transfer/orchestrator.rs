//! Drives transfers from lock to completion

use super::state::{FailureReason, Transfer, TransferKey, TransferRequest, TransferState};
use crate::chain::token_bridge::{self, BridgeContracts};
use crate::chain::{receipt_succeeded, TransactionSubmitter, TxRequest};
use crate::codec::{Attestation, TransferPayload};
use crate::error::{TrackerError, TrackerResult};
use crate::events::{EventBus, TrackerEvent, TRANSFER_UPDATE};
use crate::guardian::GuardianClient;

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::{TransactionReceipt, H256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transfer orchestrator.
///
/// In-flight transfers live in `active` until they reach a terminal state,
/// then move to `finished` where they stay queryable until pruned. Each
/// transfer is only ever touched through its own entry, so independent
/// transfers share nothing but the guardian client and the bus.
pub struct TransferOrchestrator {
    submitter: Arc<dyn TransactionSubmitter>,
    guardian: Arc<GuardianClient>,
    bus: Arc<EventBus>,
    contracts: HashMap<u16, BridgeContracts>,
    active: DashMap<Uuid, Transfer>,
    finished: DashMap<Uuid, Transfer>,
    by_key: DashMap<TransferKey, Uuid>,
    by_tx: DashMap<H256, Uuid>,
    tasks: DashMap<TransferKey, CancellationToken>,
}

impl TransferOrchestrator {
    pub fn new(
        submitter: Arc<dyn TransactionSubmitter>,
        guardian: Arc<GuardianClient>,
        bus: Arc<EventBus>,
        contracts: HashMap<u16, BridgeContracts>,
    ) -> Self {
        Self {
            submitter,
            guardian,
            bus,
            contracts,
            active: DashMap::new(),
            finished: DashMap::new(),
            by_key: DashMap::new(),
            by_tx: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    fn contracts(&self, chain: u16) -> TrackerResult<BridgeContracts> {
        self.contracts
            .get(&chain)
            .copied()
            .ok_or(TrackerError::ChainNotFound { chain })
    }

    /// Submit the lock and record the transfer.
    ///
    /// Submission failures are returned without tracking anything. A
    /// confirmed lock whose receipt lacks the publication log is tracked as
    /// `Failed` and reported as `MissingSequence`.
    pub async fn initiate(&self, request: TransferRequest) -> TrackerResult<TransferKey> {
        let source = request.source_chain;
        let contracts = self.contracts(source)?;

        let data = token_bridge::transfer_tokens_call(
            request.token,
            request.amount,
            request.target_chain,
            request.recipient.0,
            request.arbiter_fee,
            request.nonce,
        );

        let tx_hash = self
            .submitter
            .submit(source, TxRequest::call(contracts.token_bridge, data))
            .await?;
        info!("Lock submitted on chain {}: {:?}", source, tx_hash);

        let receipt = self.submitter.wait_for_confirmation(source, tx_hash).await?;
        if !receipt_succeeded(&receipt) {
            return Err(TrackerError::submission(
                source,
                format!("lock {:?} reverted", tx_hash),
            ));
        }

        let transfer = Transfer::locked(&request, tx_hash);
        let id = transfer.id;
        self.by_tx.insert(tx_hash, id);
        self.active.insert(id, transfer.clone());
        self.announce(&transfer, None);

        self.record_sequence(id, tx_hash, &receipt, contracts)
    }

    /// Locked -> AwaitingAttestation, using the sequence from the lock receipt
    fn record_sequence(
        &self,
        id: Uuid,
        tx_hash: H256,
        receipt: &TransactionReceipt,
        contracts: BridgeContracts,
    ) -> TrackerResult<TransferKey> {
        let Some(message) = token_bridge::find_published_message(receipt, contracts.core_bridge)
        else {
            self.fail(
                id,
                FailureReason::Decode(format!(
                    "lock receipt {:?} has no message publication log",
                    tx_hash
                )),
            );
            return Err(TrackerError::MissingSequence {
                tx_hash: format!("{:?}", tx_hash),
            });
        };

        let source = self
            .active
            .get(&id)
            .map(|t| t.source_chain)
            .ok_or_else(|| TrackerError::TransferNotFound(format!("{:?}", tx_hash)))?;
        let key = TransferKey::new(source, message.sequence);
        self.by_key.insert(key, id);

        self.transition_with(id, TransferState::AwaitingAttestation, None, |t| {
            t.emitter = Some(H256::from(message.emitter_address));
            t.sequence = Some(message.sequence);
        })?;
        Ok(key)
    }

    /// Track a transfer whose lock happened elsewhere (or before a restart)
    pub fn resume(
        &self,
        source_chain: u16,
        target_chain: u16,
        emitter: [u8; 32],
        sequence: u64,
    ) -> TrackerResult<TransferKey> {
        let key = TransferKey::new(source_chain, sequence);
        if self.find_active(key).is_some() {
            return Err(TrackerError::AlreadyTracked(format!("transfer {}", key)));
        }

        let transfer = Transfer::resumed(source_chain, target_chain, emitter, sequence);
        self.by_key.insert(key, transfer.id);
        self.active.insert(transfer.id, transfer.clone());
        crate::metrics::set_active_transfers(self.active.len());

        info!("Resumed transfer {} awaiting attestation", key);
        self.announce(&transfer, None);
        Ok(key)
    }

    /// AwaitingAttestation -> AttestationReady, or Failed once the guardian
    /// rounds run out. Blocks for as long as the guardian client does.
    pub async fn await_attestation(&self, key: TransferKey) -> TrackerResult<TransferState> {
        let (id, transfer) = self.active_snapshot(key)?;
        expect_state(&transfer, TransferState::AwaitingAttestation, TransferState::AttestationReady)?;

        let emitter = transfer
            .emitter
            .ok_or_else(|| TrackerError::Internal(format!("transfer {} has no emitter", key)))?;

        match self
            .guardian
            .fetch_attestation(key.source_chain, &emitter.0, key.sequence)
            .await
        {
            Ok(signed) => {
                check_payload(&transfer, &signed.attestation);
                let digest = H256::from(signed.attestation.digest());
                self.transition_with(id, TransferState::AttestationReady, None, |t| {
                    t.attestation = Some(signed.bytes);
                    t.attestation_digest = Some(digest);
                })?;
                Ok(TransferState::AttestationReady)
            }
            Err(TrackerError::AttestationTimeout { .. }) => {
                self.transition(id, TransferState::Failed, Some(FailureReason::AttestationTimeout))?;
                Ok(TransferState::Failed)
            }
            Err(e) => Err(e),
        }
    }

    /// AttestationReady -> Completed by redeeming on the target chain
    pub async fn complete(&self, key: TransferKey) -> TrackerResult<TransferState> {
        let (id, transfer) = self.active_snapshot(key)?;
        expect_state(&transfer, TransferState::AttestationReady, TransferState::Completed)?;

        let vaa = transfer
            .attestation
            .ok_or_else(|| TrackerError::Internal(format!("transfer {} has no attestation", key)))?;
        let target = transfer.target_chain;
        let contracts = self.contracts(target)?;

        let attestation = match Attestation::decode(&vaa) {
            Ok(attestation) => attestation,
            Err(e) => {
                self.fail(id, FailureReason::Decode(e.to_string()));
                return Err(e.into());
            }
        };
        debug!(
            "Redeeming attestation {:?} for {}",
            H256::from(attestation.digest()),
            key
        );

        let request = TxRequest::call(contracts.token_bridge, token_bridge::complete_transfer_call(&vaa));
        let tx_hash = match self.submitter.submit(target, request).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                self.fail(id, FailureReason::Submission(e.to_string()));
                return Err(e);
            }
        };
        info!("Completion for {} submitted on chain {}: {:?}", key, target, tx_hash);

        let receipt = match self.submitter.wait_for_confirmation(target, tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.fail(id, FailureReason::Submission(e.to_string()));
                return Err(e);
            }
        };

        if !receipt_succeeded(&receipt) {
            self.transition_with(id, TransferState::Failed, Some(FailureReason::CompletionReverted), |t| {
                t.completion_tx_hash = Some(tx_hash);
            })?;
            return Ok(TransferState::Failed);
        }

        self.transition_with(id, TransferState::Completed, None, |t| {
            t.completion_tx_hash = Some(tx_hash);
        })?;
        Ok(TransferState::Completed)
    }

    /// Run attestation waiting (and completion, if asked) in the background.
    ///
    /// Replaces any task already tracking `key`. Cancel the returned token or
    /// call `stop` to halt it.
    pub fn spawn_tracking(
        self: &Arc<Self>,
        key: TransferKey,
        auto_complete: bool,
    ) -> TrackerResult<CancellationToken> {
        self.active_snapshot(key)?;

        let token = CancellationToken::new();
        if let Some(previous) = self.tasks.insert(key, token.clone()) {
            previous.cancel();
        }

        let this = Arc::clone(self);
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    debug!("Tracking of transfer {} cancelled", key);
                }
                result = this.drive(key, auto_complete) => {
                    if let Err(e) = result {
                        warn!("Tracking of transfer {} ended: {}", key, e);
                    }
                }
            }

            if !task_token.is_cancelled() {
                this.tasks.remove(&key);
            }
        });

        Ok(token)
    }

    async fn drive(&self, key: TransferKey, auto_complete: bool) -> TrackerResult<()> {
        let (_, transfer) = self.active_snapshot(key)?;

        let mut state = transfer.state;
        if state == TransferState::AwaitingAttestation {
            state = self.await_attestation(key).await?;
        }
        if state == TransferState::AttestationReady && auto_complete {
            self.complete(key).await?;
        }
        Ok(())
    }

    /// Stop tracking a transfer and drop it from the active set.
    /// Returns false if nothing was tracked under `key`.
    pub fn stop(&self, key: TransferKey) -> bool {
        let cancelled = match self.tasks.remove(&key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        };

        let removed = match self.find_active(key) {
            Some(id) => self.remove_active(id),
            None => false,
        };

        if cancelled || removed {
            info!("Stopped tracking transfer {}", key);
            crate::metrics::set_active_transfers(self.active.len());
        }
        cancelled || removed
    }

    /// Stop everything. Safe to call repeatedly and from any task.
    pub fn stop_all(&self) {
        for entry in self.tasks.iter() {
            entry.value().cancel();
        }
        self.tasks.clear();

        let ids: Vec<Uuid> = self.active.iter().map(|entry| *entry.key()).collect();
        let count = ids.len();
        for id in ids {
            self.remove_active(id);
        }

        crate::metrics::set_active_transfers(self.active.len());
        if count > 0 {
            info!("Stopped tracking {} transfers", count);
        }
    }

    pub fn get_state(&self, key: TransferKey) -> Option<TransferState> {
        self.get_transfer(key).map(|t| t.state)
    }

    /// Active or finished transfer by key
    pub fn get_transfer(&self, key: TransferKey) -> Option<Transfer> {
        let id = *self.by_key.get(&key)?;
        self.lookup(id)
    }

    /// Active or finished transfer by its lock transaction
    pub fn get_transfer_by_tx(&self, lock_tx_hash: H256) -> Option<Transfer> {
        let id = *self.by_tx.get(&lock_tx_hash)?;
        self.lookup(id)
    }

    /// Snapshot of in-flight transfers, oldest first
    pub fn active_transfers(&self) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        transfers.sort_by_key(|t| t.created_at);
        transfers
    }

    /// Forget finished transfers last updated more than `max_age` ago
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let expired: Vec<Transfer> = self
            .finished
            .iter()
            .filter(|entry| {
                (now - entry.updated_at)
                    .to_std()
                    .map(|age| age >= max_age)
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().clone())
            .collect();

        for transfer in &expired {
            self.finished.remove(&transfer.id);
            self.unindex(transfer);
        }

        if !expired.is_empty() {
            debug!("Pruned {} finished transfers", expired.len());
        }
        expired.len()
    }

    fn lookup(&self, id: Uuid) -> Option<Transfer> {
        if let Some(transfer) = self.active.get(&id) {
            return Some(transfer.value().clone());
        }
        self.finished.get(&id).map(|t| t.value().clone())
    }

    fn find_active(&self, key: TransferKey) -> Option<Uuid> {
        let id = *self.by_key.get(&key)?;
        self.active.contains_key(&id).then_some(id)
    }

    fn active_snapshot(&self, key: TransferKey) -> TrackerResult<(Uuid, Transfer)> {
        self.find_active(key)
            .and_then(|id| self.active.get(&id).map(|t| (id, t.value().clone())))
            .ok_or_else(|| TrackerError::TransferNotFound(key.to_string()))
    }

    fn remove_active(&self, id: Uuid) -> bool {
        match self.active.remove(&id) {
            Some((_, transfer)) => {
                self.unindex(&transfer);
                true
            }
            None => false,
        }
    }

    /// Drop lookup entries that still point at `transfer`
    fn unindex(&self, transfer: &Transfer) {
        if let Some(key) = transfer.key() {
            self.by_key.remove_if(&key, |_, id| *id == transfer.id);
        }
        if let Some(tx_hash) = transfer.lock_tx_hash {
            self.by_tx.remove_if(&tx_hash, |_, id| *id == transfer.id);
        }
    }

    fn transition(
        &self,
        id: Uuid,
        next: TransferState,
        failure: Option<FailureReason>,
    ) -> TrackerResult<Transfer> {
        self.transition_with(id, next, failure, |_| {})
    }

    /// Apply a state change to an active transfer and publish it.
    /// Terminal transfers move to the finished set.
    fn transition_with<F>(
        &self,
        id: Uuid,
        next: TransferState,
        failure: Option<FailureReason>,
        update: F,
    ) -> TrackerResult<Transfer>
    where
        F: FnOnce(&mut Transfer),
    {
        let (previous, snapshot) = {
            let mut entry = self
                .active
                .get_mut(&id)
                .ok_or_else(|| TrackerError::TransferNotFound(id.to_string()))?;

            let previous = entry.state;
            if !previous.can_transition_to(next) {
                return Err(TrackerError::InvalidStateTransition {
                    from: previous.to_string(),
                    to: next.to_string(),
                });
            }

            update(entry.value_mut());
            entry.state = next;
            entry.failure = failure;
            entry.updated_at = Utc::now();
            (previous, entry.clone())
        };

        if next.is_terminal() {
            if let Some((_, transfer)) = self.active.remove(&id) {
                self.finished.insert(id, transfer);
            }
        }
        crate::metrics::set_active_transfers(self.active.len());

        match &snapshot.failure {
            Some(reason) => warn!(
                "Transfer {} {} -> {}: {}",
                describe(&snapshot),
                previous,
                next,
                reason
            ),
            None => info!("Transfer {} {} -> {}", describe(&snapshot), previous, next),
        }

        self.announce(&snapshot, Some(previous));
        Ok(snapshot)
    }

    /// Move to Failed, logging if the transfer is no longer tracked
    fn fail(&self, id: Uuid, reason: FailureReason) {
        if let Err(e) = self.transition(id, TransferState::Failed, Some(reason)) {
            debug!("Could not mark transfer {} failed: {}", id, e);
        }
    }

    /// Publish on the per-state topic and the generic update topic
    fn announce(&self, transfer: &Transfer, previous: Option<TransferState>) {
        crate::metrics::record_transfer_state(transfer.state.as_str());

        let event = TrackerEvent::TransferStateChanged {
            transfer_id: transfer.id,
            key: transfer.key(),
            lock_tx_hash: transfer.lock_tx_hash,
            previous,
            state: transfer.state,
            reason: transfer.last_error(),
        };

        self.bus
            .publish(&format!("transfer_{}", transfer.state.as_str()), event.clone());
        self.bus.publish(TRANSFER_UPDATE, event);
    }
}

fn expect_state(
    transfer: &Transfer,
    expected: TransferState,
    next: TransferState,
) -> TrackerResult<()> {
    if transfer.state == expected {
        Ok(())
    } else {
        Err(TrackerError::InvalidStateTransition {
            from: transfer.state.to_string(),
            to: next.to_string(),
        })
    }
}

fn describe(transfer: &Transfer) -> String {
    match (transfer.key(), transfer.lock_tx_hash) {
        (Some(key), _) => key.to_string(),
        (None, Some(tx_hash)) => format!("{:?}", tx_hash),
        (None, None) => transfer.id.to_string(),
    }
}

/// Warn when the attested token transfer disagrees with what we tracked.
/// The attested message stays authoritative; returns false on disagreement.
fn check_payload(transfer: &Transfer, attestation: &Attestation) -> bool {
    let payload = match TransferPayload::decode(&attestation.payload) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(
                "Attestation payload for {} is not a token transfer: {}",
                describe(transfer),
                e
            );
            return true;
        }
    };

    let mut consistent = true;
    if payload.recipient_chain != transfer.target_chain {
        warn!(
            "Attestation for {} targets chain {}, expected {}",
            describe(transfer),
            payload.recipient_chain,
            transfer.target_chain
        );
        consistent = false;
    }
    if let Some(amount) = transfer.amount {
        if payload.amount.is_zero() && !amount.is_zero() {
            warn!("Attestation for {} carries a zero amount", describe(transfer));
            consistent = false;
        }
    }
    consistent
}
