//! Per-order status polling with timeout and refund signalling

use super::state::{next_state, Auction, AuctionState};
use super::status::{OrderStatus, OrderStatusSource};
use crate::config::AuctionConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::events::{EventBus, TrackerEvent, AUCTION_UPDATE, REFUND_NEEDED};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stand-in deadline for waits too long to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct TrackedAuction {
    auction: Mutex<Auction>,
    /// Cancelled by `stop`; checked under the lock before every change
    token: CancellationToken,
}

impl TrackedAuction {
    fn lock(&self) -> MutexGuard<'_, Auction> {
        self.auction.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Auction tracker.
///
/// Each registered order gets its own poll task and its own cancellation
/// token. Terminal auctions stay in the registry (queryable, no longer
/// polled) until stopped or pruned.
pub struct AuctionTracker {
    source: Arc<dyn OrderStatusSource>,
    bus: Arc<EventBus>,
    poll_interval: Duration,
    order_timeout: Duration,
    auctions: DashMap<String, Arc<TrackedAuction>>,
}

impl AuctionTracker {
    pub fn new(
        source: Arc<dyn OrderStatusSource>,
        bus: Arc<EventBus>,
        poll_interval: Duration,
        order_timeout: Duration,
    ) -> Self {
        Self {
            source,
            bus,
            poll_interval: poll_interval.clamp(MIN_POLL_INTERVAL, FAR_FUTURE),
            order_timeout,
            auctions: DashMap::new(),
        }
    }

    pub fn from_config(
        source: Arc<dyn OrderStatusSource>,
        bus: Arc<EventBus>,
        config: &AuctionConfig,
    ) -> Self {
        Self::new(source, bus, config.poll_interval(), config.order_timeout())
    }

    /// Start tracking an order. It is announced immediately and polled
    /// until terminal, timed out, or stopped.
    ///
    /// A finished auction under the same hash is replaced.
    pub fn register(self: &Arc<Self>, order_hash: &str) -> TrackerResult<Auction> {
        let tracked = Arc::new(TrackedAuction {
            auction: Mutex::new(Auction::new(order_hash, self.order_timeout.as_secs())),
            token: CancellationToken::new(),
        });

        match self.auctions.entry(order_hash.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().lock().state.is_terminal() {
                    return Err(TrackerError::AlreadyTracked(format!("order {}", order_hash)));
                }
                existing.get().token.cancel();
                existing.insert(Arc::clone(&tracked));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&tracked));
            }
        }

        info!("Registered order {}", order_hash);
        let auction = self.transition(&tracked, AuctionState::Announced, None, |_| {})?;
        self.refresh_gauge();

        let this = Arc::clone(self);
        tokio::spawn(this.poll(order_hash.to_string(), tracked));

        Ok(auction)
    }

    async fn poll(self: Arc<Self>, order_hash: String, tracked: Arc<TrackedAuction>) {
        let started = tracked.lock().started;
        let deadline = horizon(started, self.order_timeout);
        let mut ticker = interval_at(horizon(started, self.poll_interval), self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = tracked.token.cancelled() => {
                    debug!("Polling of {} cancelled", order_hash);
                    return;
                }
                _ = sleep_until(deadline) => {
                    self.expire(&order_hash, &tracked);
                    return;
                }
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = tracked.token.cancelled() => return,
                _ = sleep_until(deadline) => {
                    self.expire(&order_hash, &tracked);
                    return;
                }
                result = self.source.get_order_status(&order_hash) => result,
            };

            match result {
                Ok(status) => {
                    if let Some(auction) = self.apply_status(&tracked, &status) {
                        if auction.state.is_terminal() {
                            debug!("Order {} finished as {}", order_hash, auction.state);
                            return;
                        }
                    }
                }
                // The timeout clock keeps running either way
                Err(e) if e.is_retryable() => {
                    warn!("Status query for {} failed: {}", order_hash, e);
                    crate::metrics::record_status_query_error();
                }
                Err(e) => {
                    error!("Status source error for {}: {}", order_hash, e);
                    crate::metrics::record_status_query_error();
                }
            }
        }
    }

    /// Force `Expired` and raise the refund signal
    fn expire(&self, order_hash: &str, tracked: &TrackedAuction) {
        let reason = TrackerError::OrderTimeout {
            order_hash: order_hash.to_string(),
            timeout_secs: self.order_timeout.as_secs(),
        }
        .to_string();

        match self.transition(tracked, AuctionState::Expired, Some(reason), |_| {}) {
            Ok(_) => {
                warn!("Order {} timed out, refund needed", order_hash);
                crate::metrics::record_refund_needed();
                self.bus.publish(
                    REFUND_NEEDED,
                    TrackerEvent::RefundNeeded {
                        order_hash: order_hash.to_string(),
                    },
                );
            }
            Err(e) => debug!("Order {} not expired: {}", order_hash, e),
        }
    }

    /// Apply a polled status; returns the new snapshot if the state changed
    fn apply_status(&self, tracked: &TrackedAuction, status: &OrderStatus) -> Option<Auction> {
        let (previous, snapshot) = {
            let mut auction = tracked.lock();
            if tracked.token.is_cancelled() {
                return None;
            }

            auction.last_status = Some(status.status.clone());
            let next = next_state(auction.state, status)?;
            let previous = auction.state;

            if matches!(
                next,
                AuctionState::ResolverSelected | AuctionState::EscrowDeposited
            ) {
                auction.absorb(status);
            }
            auction.state = next;
            auction.reason = None;
            auction.updated_at = Utc::now();
            (previous, auction.clone())
        };

        self.announce(previous, &snapshot);
        Some(snapshot)
    }

    /// Apply a tracker-driven state change
    fn transition<F>(
        &self,
        tracked: &TrackedAuction,
        next: AuctionState,
        reason: Option<String>,
        update: F,
    ) -> TrackerResult<Auction>
    where
        F: FnOnce(&mut Auction),
    {
        let (previous, snapshot) = {
            let mut auction = tracked.lock();
            if tracked.token.is_cancelled() {
                return Err(TrackerError::AuctionNotFound(auction.order_hash.clone()));
            }

            let previous = auction.state;
            if !previous.can_transition_to(next) {
                return Err(TrackerError::InvalidStateTransition {
                    from: previous.to_string(),
                    to: next.to_string(),
                });
            }

            update(&mut *auction);
            auction.state = next;
            auction.reason = reason;
            auction.updated_at = Utc::now();
            (previous, auction.clone())
        };

        self.announce(previous, &snapshot);
        Ok(snapshot)
    }

    /// Publish on the state's own topic and on `auction_update`
    fn announce(&self, previous: AuctionState, auction: &Auction) {
        info!(
            "Order {} {} -> {}",
            auction.order_hash, previous, auction.state
        );
        crate::metrics::record_auction_state(auction.state.as_str());

        let event = TrackerEvent::AuctionStateChanged {
            order_hash: auction.order_hash.clone(),
            previous,
            state: auction.state,
            resolver: auction.resolver.clone(),
            reason: auction.reason.clone(),
        };
        self.bus.publish(auction.state.as_str(), event.clone());
        self.bus.publish(AUCTION_UPDATE, event);

        if auction.state.is_terminal() {
            self.refresh_gauge();
        }
    }

    fn tracked(&self, order_hash: &str) -> TrackerResult<Arc<TrackedAuction>> {
        self.auctions
            .get(order_hash)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TrackerError::AuctionNotFound(order_hash.to_string()))
    }

    /// Forward the order secret and move `EscrowDeposited -> SecretRevealing`
    pub async fn reveal_secret(&self, order_hash: &str, secret: &str) -> TrackerResult<Auction> {
        let tracked = self.tracked(order_hash)?;

        let state = tracked.lock().state;
        if !state.can_transition_to(AuctionState::SecretRevealing) {
            return Err(TrackerError::InvalidStateTransition {
                from: state.to_string(),
                to: AuctionState::SecretRevealing.to_string(),
            });
        }

        self.source.submit_secret(order_hash, secret).await?;
        self.transition(&tracked, AuctionState::SecretRevealing, None, |_| {})
    }

    /// `Expired | Failed -> Refunding`
    pub fn begin_refund(&self, order_hash: &str) -> TrackerResult<Auction> {
        let tracked = self.tracked(order_hash)?;
        let auction = self.transition(&tracked, AuctionState::Refunding, None, |_| {})?;
        self.refresh_gauge();
        Ok(auction)
    }

    /// `Refunding -> Refunded`, recording the refund transaction
    pub fn complete_refund(&self, order_hash: &str, tx_hash: &str) -> TrackerResult<Auction> {
        let tracked = self.tracked(order_hash)?;
        self.transition(&tracked, AuctionState::Refunded, None, |auction| {
            auction.refund_tx_hash = Some(tx_hash.to_string());
        })
    }

    /// Stop tracking an order. No poll or state change happens after this
    /// returns. Returns false if the order was not tracked.
    pub fn stop(&self, order_hash: &str) -> bool {
        let Some((_, tracked)) = self.auctions.remove(order_hash) else {
            return false;
        };

        tracked.token.cancel();
        // Wait out any change already in progress
        drop(tracked.lock());

        info!("Stopped tracking order {}", order_hash);
        self.refresh_gauge();
        true
    }

    /// Stop every order. Idempotent.
    pub fn stop_all(&self) {
        let hashes: Vec<String> = self
            .auctions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let stopped = hashes.iter().filter(|hash| self.stop(hash)).count();
        if stopped > 0 {
            info!("Stopped tracking {} orders", stopped);
        }
    }

    pub fn get_state(&self, order_hash: &str) -> Option<AuctionState> {
        self.get_auction(order_hash).map(|a| a.state)
    }

    pub fn get_auction(&self, order_hash: &str) -> Option<Auction> {
        let tracked = self.tracked(order_hash).ok()?;
        let auction = tracked.lock().clone();
        Some(auction)
    }

    /// Orders not yet in a terminal state, oldest first
    pub fn active_auctions(&self) -> Vec<Auction> {
        let mut auctions: Vec<Auction> = self
            .snapshot_all()
            .into_iter()
            .filter(|a| !a.state.is_terminal())
            .collect();
        auctions.sort_by_key(|a| a.registered_at);
        auctions
    }

    /// Drop terminal auctions last updated more than `max_age` ago
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = self
            .snapshot_all()
            .into_iter()
            .filter(|a| a.state.is_terminal())
            .filter(|a| {
                (now - a.updated_at)
                    .to_std()
                    .map(|age| age >= max_age)
                    .unwrap_or(false)
            })
            .map(|a| a.order_hash)
            .collect();

        let pruned = stale.iter().filter(|hash| self.stop(hash)).count();
        if pruned > 0 {
            debug!("Pruned {} finished auctions", pruned);
        }
        pruned
    }

    fn snapshot_all(&self) -> Vec<Auction> {
        let tracked: Vec<Arc<TrackedAuction>> = self
            .auctions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tracked.iter().map(|t| t.lock().clone()).collect()
    }

    fn refresh_gauge(&self) {
        let active = self
            .snapshot_all()
            .iter()
            .filter(|a| !a.state.is_terminal())
            .count();
        crate::metrics::set_active_auctions(active);
    }
}

fn horizon(start: Instant, wait: Duration) -> Instant {
    start
        .checked_add(wait)
        .unwrap_or_else(|| start + FAR_FUTURE)
}
