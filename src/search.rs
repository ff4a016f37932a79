//! Recency-biased record search.
//!
//! Search reads a fixed window of the newest records in scope and filters it
//! in memory. Older matches outside the window are not found.

use crate::access::AccessScope;
use crate::store::RecordStore;
use crate::subscriptions::SortOrder;
use crate::types::RegistrationRecord;
use std::sync::Arc;

/// Default number of results.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Records read per result slot.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 2;

pub struct SearchService {
    store: Arc<RecordStore>,
    overfetch_factor: usize,
}

impl SearchService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }

    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    /// Case-insensitive substring match on student id or full name, over the
    /// `limit * overfetch_factor` newest records visible in `scope`.
    /// Results stay newest first.
    pub fn search(&self, scope: &AccessScope, term: &str, limit: usize) -> Vec<RegistrationRecord> {
        let needle = term.trim().to_lowercase();
        let window = limit.saturating_mul(self.overfetch_factor);

        self.store
            .list(&scope.filter(), SortOrder::NewestFirst, window)
            .into_iter()
            .filter(|record| matches_term(record, &needle))
            .take(limit)
            .collect()
    }
}

fn matches_term(record: &RegistrationRecord, needle: &str) -> bool {
    record.student_id.to_lowercase().contains(needle)
        || record.full_name.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinancialValidation, PaymentMethod, RecordId, Timestamp};
    use rust_decimal::Decimal;

    fn record(name: &str, student_id: &str) -> RegistrationRecord {
        RegistrationRecord {
            id: RecordId(1),
            created_at: Timestamp(1),
            full_name: name.into(),
            student_id: student_id.into(),
            email: "s@example.edu".into(),
            programme: "Nursing".into(),
            program_level: "Level 100".into(),
            sex: "F".into(),
            phone: "0200000000".into(),
            payment_method: PaymentMethod::Cash,
            amount_paid: Decimal::ZERO,
            souvenirs: vec!["None".into()],
            collected_by: "Ama".into(),
            collected_by_uid: "e1".into(),
            financial_validation: FinancialValidation::pending(),
        }
    }

    #[test]
    fn test_matches_name_or_id_case_insensitive() {
        let r = record("Abena Owusu", "UGx204511");
        assert!(matches_term(&r, "owusu"));
        assert!(matches_term(&r, "ugx204"));
        assert!(matches_term(&r, ""));
        assert!(!matches_term(&r, "mensah"));
    }
}
