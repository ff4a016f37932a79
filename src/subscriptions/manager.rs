//! Subscription manager for pushing live snapshots.

use crate::subscriptions::types::{
    DropReason, FeedEvent, RecordChange, RecordFilter, Snapshot, SortOrder, SubscriptionConfig,
    SubscriptionHandle, SubscriptionId,
};
use crate::types::RegistrationRecord;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<FeedEvent>,
    /// Second end of the subscriber's channel, used to evict stale snapshots.
    backlog: Receiver<FeedEvent>,
    /// Revision of the next snapshot.
    next_revision: AtomicU64,
}

impl Subscription {
    /// Queue a snapshot. When the buffer is full the oldest queued snapshots
    /// are discarded to make room; each snapshot is a full result set, so the
    /// newest one supersedes them. Returns how many were discarded.
    fn deliver(&self, id: SubscriptionId, records: Vec<RegistrationRecord>) -> usize {
        let mut event = FeedEvent::Snapshot(Snapshot {
            subscription: id,
            revision: self.next_revision.fetch_add(1, Ordering::SeqCst),
            records,
        });
        let mut discarded = 0;

        loop {
            match self.sender.try_send(event) {
                Ok(()) => return discarded,
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    if self.backlog.try_recv().is_ok() {
                        discarded += 1;
                    }
                }
                // Unreachable while `backlog` is alive
                Err(TrySendError::Disconnected(_)) => return discarded,
            }
        }
    }
}

/// Materialization key: subscriptions sharing it receive the same records.
type QueryKey = (RecordFilter, SortOrder, usize);

/// Tracks live subscriptions and re-delivers their full matching set when a
/// relevant record changes.
///
/// The manager holds no records. Callers hand it a `materialize` function
/// over the current store state, so a snapshot is always a pure function of
/// (store state, filter, order, limit).
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription and deliver `initial` as its first snapshot.
    ///
    /// The caller must keep the store from mutating between computing
    /// `initial` and this call returning.
    pub fn register(
        self: &Arc<Self>,
        config: SubscriptionConfig,
        initial: Vec<RegistrationRecord>,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        let subscription = Subscription {
            config,
            sender,
            backlog: receiver.clone(),
            next_revision: AtomicU64::new(0),
        };
        subscription.deliver(id, initial);

        debug!(subscription = id.0, filter = ?subscription.config.filter, "subscription registered");
        self.subscriptions.write().insert(id, subscription);

        SubscriptionHandle::new(id, receiver, Arc::downgrade(self))
    }

    /// Unsubscribe and clean up. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            debug!(subscription = id.0, "subscription cancelled");
            // Best effort
            let _ = sub.sender.try_send(FeedEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Re-deliver snapshots to every subscription the change is relevant to.
    ///
    /// Subscriptions with identical (filter, order, limit) share one
    /// materialization. A subscriber that is not keeping up loses its older
    /// undelivered snapshots, never the subscription itself.
    /// Returns the number of snapshots delivered.
    pub fn publish<F>(&self, change: &RecordChange, materialize: F) -> usize
    where
        F: Fn(&RecordFilter, SortOrder, usize) -> Vec<RegistrationRecord>,
    {
        let subs = self.subscriptions.read();
        let mut computed: HashMap<QueryKey, Vec<RegistrationRecord>> = HashMap::new();
        let mut delivered = 0;

        for (id, sub) in subs.iter() {
            let filter = &sub.config.filter;
            if !change.touches(filter) {
                continue;
            }

            let key = (filter.clone(), sub.config.order, sub.config.limit);
            let records = computed
                .entry(key)
                .or_insert_with(|| materialize(filter, sub.config.order, sub.config.limit))
                .clone();

            let discarded = sub.deliver(*id, records);
            if discarded > 0 {
                debug!(subscription = id.0, discarded, "lagging subscriber, stale snapshots coalesced");
            }
            delivered += 1;
        }

        delivered
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
