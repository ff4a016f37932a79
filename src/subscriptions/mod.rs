//! Live queries over the record store.
//!
//! A subscription is a standing (filter, order, limit) query. Whenever a
//! record it could see is created, patched or deleted, the subscriber gets
//! the entire current matching set again, not a diff.
//!
//! Delivery is ordered per subscription. Subscriptions are independent of
//! each other; changing a filter means cancelling and subscribing anew.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig::filtered(
//!     RecordFilter::programme("Cybersecurity"),
//! ));
//!
//! for snapshot in handle.snapshots() {
//!     render(&snapshot.records);
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, FeedEvent, RecordChange, RecordFilter, Snapshot, Snapshots, SortOrder,
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, DEFAULT_FEED_LIMIT,
};
