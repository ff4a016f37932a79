//! In-memory record index.

use crate::subscriptions::{RecordFilter, SortOrder};
use crate::types::{OrderKey, RecordId, RegistrationRecord, ValidationPatch};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// Live records keyed by id, plus their listing order.
#[derive(Default)]
pub struct RecordIndex {
    /// Record ID to record.
    by_id: HashMap<RecordId, RegistrationRecord>,

    /// Ascending (created_at, id). Listings walk it backwards.
    order: BTreeSet<OrderKey>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&RegistrationRecord> {
        self.by_id.get(&id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn insert(&mut self, record: RegistrationRecord) {
        if let Some(old) = self.by_id.get(&record.id) {
            self.order.remove(&old.order_key());
        }
        self.order.insert(record.order_key());
        self.by_id.insert(record.id, record);
    }

    pub fn remove(&mut self, id: RecordId) -> Option<RegistrationRecord> {
        let record = self.by_id.remove(&id)?;
        self.order.remove(&record.order_key());
        Some(record)
    }

    /// Apply a validation patch. Returns the record before and after.
    pub fn apply_patch(
        &mut self,
        id: RecordId,
        patch: &ValidationPatch,
    ) -> Option<(RegistrationRecord, RegistrationRecord)> {
        let record = self.by_id.get_mut(&id)?;
        let before = record.clone();
        patch.apply_to(&mut record.financial_validation);
        Some((before, record.clone()))
    }

    /// Matching records in `order`, at most `limit` of them.
    pub fn query(&self, filter: &RecordFilter, order: SortOrder, limit: usize) -> Vec<RegistrationRecord> {
        let keys: Box<dyn Iterator<Item = &OrderKey>> = match order {
            SortOrder::NewestFirst => Box::new(self.order.iter().rev()),
            SortOrder::OldestFirst => Box::new(self.order.iter()),
        };

        keys.filter_map(|key| self.by_id.get(&key.id))
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Newest-first matching records strictly after `cursor` in listing order.
    pub fn page_after(
        &self,
        filter: &RecordFilter,
        cursor: Option<OrderKey>,
        limit: usize,
    ) -> Vec<RegistrationRecord> {
        let upper = match cursor {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        self.order
            .range((Bound::Unbounded, upper))
            .rev()
            .filter_map(|key| self.by_id.get(&key.id))
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }
}
