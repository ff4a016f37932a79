//! Caller-facing boundary.
//!
//! Every operation takes the authenticated [`Caller`], resolves its scope or
//! checks its rights, and only then reaches the store.

use crate::access::{scope_for, AccessScope, Caller, Role};
use crate::config::PortalConfig;
use crate::error::{RegistryError, Result};
use crate::notify::{NotificationDispatcher, RegistrationNotice, RegistrationNotifier};
use crate::search::SearchService;
use crate::stats::{agent_summaries, AgentSummary, RegistrationStats, StatsAggregator, StatsCache};
use crate::store::{Page, RecordStore};
use crate::subscriptions::{RecordFilter, SortOrder, SubscriptionConfig, SubscriptionHandle};
use crate::types::{OrderKey, RecordId, RegistrationInput, RegistrationRecord, ValidationStatus};
use crate::validation::{BulkTransitionReport, ValidationWorkflow};
use std::sync::Arc;
use tracing::info;

pub struct RegistrationPortal {
    config: PortalConfig,
    store: Arc<RecordStore>,
    workflow: ValidationWorkflow,
    stats: StatsAggregator,
    search: SearchService,
    notifications: NotificationDispatcher,
}

impl RegistrationPortal {
    /// Open (or create) the store named in `config` and build the portal on it.
    pub fn open(config: PortalConfig, notifier: Arc<dyn RegistrationNotifier>) -> Result<Self> {
        let store = Arc::new(RecordStore::open_or_create(config.store.clone())?);
        Self::with_store(store, config, notifier)
    }

    /// Build the portal on an already opened store.
    pub fn with_store(
        store: Arc<RecordStore>,
        config: PortalConfig,
        notifier: Arc<dyn RegistrationNotifier>,
    ) -> Result<Self> {
        let workflow = ValidationWorkflow::new(Arc::clone(&store), config.transition_policy());
        let stats = StatsAggregator::new(Arc::clone(&store), StatsCache::new(config.stats_ttl()))
            .with_sample_cap(config.stats_sample_cap);
        let search = SearchService::new(Arc::clone(&store))
            .with_overfetch_factor(config.search_overfetch_factor);
        let notifications = NotificationDispatcher::new(notifier)?;

        Ok(Self {
            config,
            store,
            workflow,
            stats,
            search,
            notifications,
        })
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    // --- Mutations ---

    /// Create a registration collected by `caller`.
    ///
    /// Provenance comes from the caller, not from `input`. The confirmation
    /// notice is queued after the record is persisted and cannot fail the call.
    pub fn submit_registration(
        &self,
        caller: &Caller,
        mut input: RegistrationInput,
    ) -> Result<RecordId> {
        caller.require_role()?;

        input.collected_by = caller.display_name.clone();
        input.collected_by_uid = caller.id.clone();

        let record = self.store.create_record(input)?;
        self.notifications.dispatch(RegistrationNotice::from(&record));

        Ok(record.id)
    }

    /// Delete a record. Presidents may delete any record, everyone else only
    /// records they collected. A refused caller cannot tell a missing record
    /// from someone else's.
    ///
    /// For non-presidents the ownership check needs a read-only lookup
    /// before the decision; it never reveals whether the record exists.
    pub fn delete_registration(&self, caller: &Caller, id: RecordId) -> Result<()> {
        let role = caller.require_role()?;

        if role != Role::President {
            let owned = self
                .store
                .read(id)
                .map(|record| caller.can_delete(&record))
                .unwrap_or(false);
            if !owned {
                return Err(RegistryError::AccessDenied(
                    "only the collecting agent or the president may delete a registration".into(),
                ));
            }
        }

        self.store.delete(id)?;
        info!(record = id.0, by = %caller.id, "registration deleted");
        Ok(())
    }

    /// Move a record to `target`.
    pub fn transition(
        &self,
        caller: &Caller,
        id: RecordId,
        target: ValidationStatus,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord> {
        self.require_transition_rights(caller)?;
        self.workflow
            .transition(id, target, &caller.display_name, notes)
    }

    /// Move many records to `target`, each independently.
    pub fn transition_many(
        &self,
        caller: &Caller,
        ids: &[RecordId],
        target: ValidationStatus,
    ) -> Result<BulkTransitionReport> {
        self.require_transition_rights(caller)?;
        Ok(self
            .workflow
            .transition_many(ids, target, &caller.display_name))
    }

    /// Validate many records at once.
    pub fn validate_many(&self, caller: &Caller, ids: &[RecordId]) -> Result<BulkTransitionReport> {
        self.transition_many(caller, ids, ValidationStatus::Validated)
    }

    fn require_transition_rights(&self, caller: &Caller) -> Result<()> {
        caller.require_role()?;
        if !caller.can_transition() {
            return Err(RegistryError::AccessDenied(
                "only finance and the president may change validation status".into(),
            ));
        }
        Ok(())
    }

    // --- Reads ---

    /// Open a live feed of the caller's visible records.
    pub fn subscribe(
        &self,
        caller: &Caller,
        filter: RecordFilter,
        limit: Option<usize>,
    ) -> Result<SubscriptionHandle> {
        let filter = scope_for(caller)?.apply(filter)?;
        let config = SubscriptionConfig {
            filter,
            order: SortOrder::NewestFirst,
            limit: self.config.feed_limit(limit),
            buffer_size: self.config.subscription_buffer,
        };
        Ok(self.store.subscribe(config))
    }

    /// Cancel `previous` and open a feed with new parameters.
    pub fn resubscribe(
        &self,
        previous: SubscriptionHandle,
        caller: &Caller,
        filter: RecordFilter,
        limit: Option<usize>,
    ) -> Result<SubscriptionHandle> {
        previous.cancel();
        self.subscribe(caller, filter, limit)
    }

    /// One-shot listing, newest first.
    pub fn list(
        &self,
        caller: &Caller,
        filter: RecordFilter,
        limit: Option<usize>,
    ) -> Result<Vec<RegistrationRecord>> {
        let filter = scope_for(caller)?.apply(filter)?;
        Ok(self
            .store
            .list(&filter, SortOrder::NewestFirst, self.config.feed_limit(limit)))
    }

    /// Cursor-paginated listing, newest first.
    pub fn list_page(
        &self,
        caller: &Caller,
        filter: RecordFilter,
        page_size: usize,
        after: Option<OrderKey>,
    ) -> Result<Page> {
        let filter = scope_for(caller)?.apply(filter)?;
        Ok(self
            .store
            .list_page(&filter, self.config.feed_limit(Some(page_size)), after))
    }

    /// Read one record the caller is allowed to see.
    pub fn read(&self, caller: &Caller, id: RecordId) -> Result<RegistrationRecord> {
        match scope_for(caller)? {
            AccessScope::Full => self.store.read(id),
            scope => match self.store.read(id) {
                Ok(record) if scope.permits(&record) => Ok(record),
                _ => Err(RegistryError::AccessDenied(
                    "record is outside the caller's scope".into(),
                )),
            },
        }
    }

    pub fn search(
        &self,
        caller: &Caller,
        term: &str,
        limit: Option<usize>,
    ) -> Result<Vec<RegistrationRecord>> {
        let scope = scope_for(caller)?;
        let limit = limit.unwrap_or(self.config.search_default_limit);
        Ok(self.search.search(&scope, term, limit))
    }

    pub fn stats(&self, caller: &Caller, force_refresh: bool) -> Result<RegistrationStats> {
        let scope = scope_for(caller)?;
        Ok(self.stats.get_stats(&scope, force_refresh))
    }

    /// Per-agent totals over the caller's visible records matching `filter`.
    pub fn agent_report(
        &self,
        caller: &Caller,
        filter: RecordFilter,
        limit: Option<usize>,
    ) -> Result<Vec<AgentSummary>> {
        let records = self.list(caller, filter, limit)?;
        Ok(agent_summaries(&records))
    }
}
