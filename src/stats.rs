//! Registration statistics with a time-boxed cache.
//!
//! Statistics are computed over a bounded window of the most recent records,
//! so they are approximate once the store outgrows the window.

use crate::access::AccessScope;
use crate::clock::TimeSource;
use crate::store::RecordStore;
use crate::subscriptions::SortOrder;
use crate::types::{PaymentMethod, RegistrationRecord, Timestamp, ValidationStatus};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long computed statistics stay valid.
pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(5 * 60);

/// How many of the most recent records statistics look at.
pub const DEFAULT_SAMPLE_CAP: usize = 1000;

/// Summary counts over a set of records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStats {
    pub total: usize,
    pub total_amount: Decimal,
    pub validated_count: usize,
    pub pending_count: usize,
    pub disputed_count: usize,
    pub by_programme: BTreeMap<String, usize>,
}

impl RegistrationStats {
    pub fn from_records(records: &[RegistrationRecord]) -> Self {
        let mut stats = Self::default();

        for record in records {
            stats.total += 1;
            stats.total_amount += record.amount_paid;
            match record.status() {
                ValidationStatus::Validated => stats.validated_count += 1,
                ValidationStatus::Pending => stats.pending_count += 1,
                ValidationStatus::Disputed => stats.disputed_count += 1,
            }
            *stats.by_programme.entry(record.programme.clone()).or_default() += 1;
        }

        stats
    }
}

/// A cached value and when it was computed.
#[derive(Clone, Debug)]
pub struct CachedStats {
    pub value: RegistrationStats,
    pub computed_at: Timestamp,
}

/// Statistics cache, one entry per visibility scope.
#[derive(Debug)]
pub struct StatsCache {
    entries: HashMap<AccessScope, CachedStats>,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value for `scope` if it is younger than the TTL at `now`.
    pub fn get_fresh(&self, scope: &AccessScope, now: Timestamp) -> Option<&RegistrationStats> {
        self.entries
            .get(scope)
            .filter(|cached| now.duration_since(cached.computed_at) < self.ttl)
            .map(|cached| &cached.value)
    }

    pub fn put(&mut self, scope: AccessScope, value: RegistrationStats, now: Timestamp) {
        self.entries.insert(
            scope,
            CachedStats {
                value,
                computed_at: now,
            },
        );
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_TTL)
    }
}

/// Computes statistics on demand and caches them.
pub struct StatsAggregator {
    store: Arc<RecordStore>,
    cache: Mutex<StatsCache>,
    clock: Arc<dyn TimeSource>,
    sample_cap: usize,
}

impl StatsAggregator {
    /// Uses the store's clock for cache ages.
    pub fn new(store: Arc<RecordStore>, cache: StatsCache) -> Self {
        let clock = store.time_source();
        Self {
            store,
            cache: Mutex::new(cache),
            clock,
            sample_cap: DEFAULT_SAMPLE_CAP,
        }
    }

    pub fn with_sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap;
        self
    }

    /// Statistics for `scope`, from cache unless stale or `force_refresh`.
    ///
    /// The cache lock is held while computing, so callers racing on a miss
    /// wait for one computation and then share its result.
    pub fn get_stats(&self, scope: &AccessScope, force_refresh: bool) -> RegistrationStats {
        let mut cache = self.cache.lock();
        let now = self.clock.now();

        if !force_refresh {
            if let Some(stats) = cache.get_fresh(scope, now) {
                debug!(?scope, "stats cache hit");
                return stats.clone();
            }
        }

        let records = self
            .store
            .list(&scope.filter(), SortOrder::NewestFirst, self.sample_cap);
        let stats = RegistrationStats::from_records(&records);
        debug!(?scope, sampled = records.len(), force_refresh, "stats recomputed");

        cache.put(scope.clone(), stats.clone(), now);
        stats
    }

    /// Drop every cached value.
    pub fn invalidate(&self) {
        self.cache.lock().invalidate();
    }
}

/// Per-agent collection totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Collecting agent's display name.
    pub agent: String,
    pub total_records: usize,
    pub total_amount: Decimal,
    pub mobile_money_count: usize,
    pub mobile_money_amount: Decimal,
    pub cash_count: usize,
    pub cash_amount: Decimal,
}

/// Group already-fetched records by collecting agent, sorted by agent name.
pub fn agent_summaries(records: &[RegistrationRecord]) -> Vec<AgentSummary> {
    let mut by_agent: BTreeMap<&str, AgentSummary> = BTreeMap::new();

    for record in records {
        let summary = by_agent
            .entry(record.collected_by.as_str())
            .or_insert_with(|| AgentSummary {
                agent: record.collected_by.clone(),
                ..Default::default()
            });

        summary.total_records += 1;
        summary.total_amount += record.amount_paid;
        match record.payment_method {
            PaymentMethod::MobileMoney => {
                summary.mobile_money_count += 1;
                summary.mobile_money_amount += record.amount_paid;
            }
            PaymentMethod::Cash => {
                summary.cash_count += 1;
                summary.cash_amount += record.amount_paid;
            }
        }
    }

    by_agent.into_values().collect()
}
