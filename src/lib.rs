//! # Registration Store
//!
//! Data access and validation layer for a student registration portal.
//!
//! ## Core Concepts
//!
//! - **Records**: one registration per student, created by a collecting agent
//!   and journaled to disk
//! - **Subscriptions**: live queries that receive the full matching set again
//!   whenever a relevant record changes
//! - **Scopes**: executives see only what they collected; finance and the
//!   president see everything
//! - **Validation**: records move between pending, validated and disputed
//!   under an injectable transition policy
//! - **Statistics**: approximate summaries over recent records, cached for a
//!   fixed TTL
//!
//! ## Example
//!
//! ```ignore
//! use registration_store::{Caller, NoopNotifier, PortalConfig, RecordFilter, RegistrationPortal};
//!
//! let portal = RegistrationPortal::open(PortalConfig::default(), Arc::new(NoopNotifier))?;
//!
//! let exec = Caller::executive("uid-17", "Kofi");
//! let id = portal.submit_registration(&exec, input)?;
//!
//! // Executives only ever see their own records
//! let feed = portal.subscribe(&exec, RecordFilter::all(), None)?;
//!
//! let finance = Caller::financial_officer("uid-2", "Efua");
//! portal.transition(&finance, id, ValidationStatus::Disputed, Some("amount mismatch"))?;
//! ```

pub mod access;
pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod portal;
pub mod records;
pub mod search;
pub mod stats;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod validation;

// Re-exports
pub use access::{scope_for, AccessScope, Caller, Role};
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::PortalConfig;
pub use error::{RegistryError, Result};
pub use notify::{
    NoopNotifier, NotificationDispatcher, NotifyError, RegistrationNotice, RegistrationNotifier,
};
pub use portal::RegistrationPortal;
pub use records::{JournalEntry, RecordIndex, RegistrationJournal};
pub use search::SearchService;
pub use stats::{
    agent_summaries, AgentSummary, CachedStats, RegistrationStats, StatsAggregator, StatsCache,
};
pub use store::{Page, RecordStore, StoreConfig};
pub use subscriptions::{
    DropReason, FeedEvent, RecordChange, RecordFilter, Snapshot, SortOrder, SubscriptionConfig,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
pub use validation::{
    BulkFailure, BulkTransitionReport, TransitionPolicy, TransitionPreset, ValidationWorkflow,
};
