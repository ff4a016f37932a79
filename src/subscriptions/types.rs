//! Subscription types for live record feeds.

use crate::types::{RecordId, RegistrationRecord, ValidationStatus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use super::manager::SubscriptionManager;

/// Default number of records materialized per snapshot.
pub const DEFAULT_FEED_LIMIT: usize = 50;

/// Conjunction of optional equality predicates. `None` means no constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFilter {
    pub programme: Option<String>,
    pub status: Option<ValidationStatus>,
    pub collected_by_uid: Option<String>,
}

impl RecordFilter {
    /// No constraint at all.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn programme(programme: impl Into<String>) -> Self {
        Self::default().with_programme(programme)
    }

    pub fn status(status: ValidationStatus) -> Self {
        Self::default().with_status(status)
    }

    pub fn collected_by(agent_uid: impl Into<String>) -> Self {
        Self::default().with_collected_by(agent_uid)
    }

    pub fn with_programme(mut self, programme: impl Into<String>) -> Self {
        self.programme = Some(programme.into());
        self
    }

    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_collected_by(mut self, agent_uid: impl Into<String>) -> Self {
        self.collected_by_uid = Some(agent_uid.into());
        self
    }

    pub fn matches(&self, record: &RegistrationRecord) -> bool {
        if let Some(ref programme) = self.programme {
            if &record.programme != programme {
                return false;
            }
        }

        if let Some(status) = self.status {
            if record.financial_validation.status != status {
                return false;
            }
        }

        if let Some(ref uid) = self.collected_by_uid {
            if &record.collected_by_uid != uid {
                return false;
            }
        }

        true
    }
}

/// Listing order. Both orders break creation-time ties by id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    pub filter: RecordFilter,

    pub order: SortOrder,

    /// Hard cap on records per snapshot.
    /// Default: 50
    pub limit: usize,

    /// Max undelivered snapshots kept; older ones are discarded first.
    /// Default: 256
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            filter: RecordFilter::default(),
            order: SortOrder::NewestFirst,
            limit: DEFAULT_FEED_LIMIT,
            buffer_size: 256,
        }
    }
}

impl SubscriptionConfig {
    pub fn filtered(filter: RecordFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A store mutation, as seen by the subscription engine.
#[derive(Clone, Debug)]
pub enum RecordChange {
    Created(RegistrationRecord),
    Patched {
        before: RegistrationRecord,
        after: RegistrationRecord,
    },
    Deleted(RegistrationRecord),
}

impl RecordChange {
    pub fn record_id(&self) -> RecordId {
        match self {
            RecordChange::Created(r) | RecordChange::Deleted(r) => r.id,
            RecordChange::Patched { after, .. } => after.id,
        }
    }

    /// Whether the change can alter the result of `filter`: the record
    /// matched before the change, after it, or both.
    pub fn touches(&self, filter: &RecordFilter) -> bool {
        match self {
            RecordChange::Created(r) | RecordChange::Deleted(r) => filter.matches(r),
            RecordChange::Patched { before, after } => {
                filter.matches(before) || filter.matches(after)
            }
        }
    }
}

/// Full matching set delivered to a subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub subscription: SubscriptionId,
    /// 0 for the initial snapshot, then +1 per delivery.
    pub revision: u64,
    pub records: Vec<RegistrationRecord>,
}

impl Snapshot {
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn get(&self, id: RecordId) -> Option<&RegistrationRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// Events emitted on a subscription channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Snapshot(Snapshot),

    /// Subscription was dropped; nothing follows.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Explicitly cancelled.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Handle to a live subscription. Dropping it cancels the subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    receiver: crossbeam_channel::Receiver<FeedEvent>,
    manager: Weak<SubscriptionManager>,
    cancelled: AtomicBool,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: crossbeam_channel::Receiver<FeedEvent>,
        manager: Weak<SubscriptionManager>,
    ) -> Self {
        Self {
            id,
            receiver,
            manager,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Stop deliveries. Calling it again does nothing.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent, crossbeam_channel::RecvError> {
        if self.is_cancelled() {
            return Err(crossbeam_channel::RecvError);
        }
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent, crossbeam_channel::TryRecvError> {
        if self.is_cancelled() {
            return Err(crossbeam_channel::TryRecvError::Disconnected);
        }
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<FeedEvent, crossbeam_channel::RecvTimeoutError> {
        if self.is_cancelled() {
            return Err(crossbeam_channel::RecvTimeoutError::Disconnected);
        }
        self.receiver.recv_timeout(timeout)
    }

    /// Next snapshot within `timeout`, or `None` on timeout, drop or cancel.
    pub fn next_snapshot(&self, timeout: Duration) -> Option<Snapshot> {
        match self.recv_timeout(timeout) {
            Ok(FeedEvent::Snapshot(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    /// Blocking iterator over snapshots. Ends when the subscription is
    /// cancelled or dropped.
    pub fn snapshots(&self) -> Snapshots<'_> {
        Snapshots { handle: self }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Iterator returned by [`SubscriptionHandle::snapshots`].
pub struct Snapshots<'a> {
    handle: &'a SubscriptionHandle,
}

impl Iterator for Snapshots<'_> {
    type Item = Snapshot;

    fn next(&mut self) -> Option<Snapshot> {
        match self.handle.recv() {
            Ok(FeedEvent::Snapshot(snapshot)) => Some(snapshot),
            Ok(FeedEvent::Dropped { .. }) | Err(_) => None,
        }
    }
}
