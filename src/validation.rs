//! Financial validation workflow.
//!
//! Which status changes are legal is data, not code: a [`TransitionPolicy`]
//! holds the allowed (from, to) pairs and whether a dispute needs notes.

use crate::error::{RegistryError, Result};
use crate::store::RecordStore;
use crate::types::{RecordId, RegistrationRecord, ValidationPatch, ValidationStatus};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Named transition tables selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPreset {
    /// Any status may move to validated or disputed.
    #[default]
    Permissive,
    /// Only pending records may move, to validated or disputed.
    PendingOnly,
}

/// Allowed status transitions plus the dispute-notes rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionPolicy {
    allowed: HashSet<(ValidationStatus, ValidationStatus)>,
    require_dispute_notes: bool,
}

impl TransitionPolicy {
    /// Nothing allowed.
    pub fn empty() -> Self {
        Self {
            allowed: HashSet::new(),
            require_dispute_notes: false,
        }
    }

    /// Any source status to validated or disputed, including re-deciding an
    /// already decided record.
    pub fn permissive() -> Self {
        ValidationStatus::ALL.into_iter().fold(Self::empty(), |policy, from| {
            policy
                .allow(from, ValidationStatus::Validated)
                .allow(from, ValidationStatus::Disputed)
        })
    }

    /// Pending to validated or disputed; decided records are final.
    pub fn pending_only() -> Self {
        Self::empty()
            .allow(ValidationStatus::Pending, ValidationStatus::Validated)
            .allow(ValidationStatus::Pending, ValidationStatus::Disputed)
    }

    pub fn from_preset(preset: TransitionPreset) -> Self {
        match preset {
            TransitionPreset::Permissive => Self::permissive(),
            TransitionPreset::PendingOnly => Self::pending_only(),
        }
    }

    pub fn allow(mut self, from: ValidationStatus, to: ValidationStatus) -> Self {
        self.allowed.insert((from, to));
        self
    }

    pub fn forbid(mut self, from: ValidationStatus, to: ValidationStatus) -> Self {
        self.allowed.remove(&(from, to));
        self
    }

    pub fn requiring_dispute_notes(mut self, required: bool) -> Self {
        self.require_dispute_notes = required;
        self
    }

    pub fn permits(&self, from: ValidationStatus, to: ValidationStatus) -> bool {
        self.allowed.contains(&(from, to))
    }

    pub fn requires_dispute_notes(&self) -> bool {
        self.require_dispute_notes
    }

    /// Validate a transition request against the table and the notes rule.
    pub fn check(
        &self,
        from: ValidationStatus,
        to: ValidationStatus,
        notes: Option<&str>,
    ) -> Result<()> {
        if !self.permits(from, to) {
            return Err(RegistryError::Validation(format!(
                "transition {from} -> {to} is not allowed"
            )));
        }

        if to == ValidationStatus::Disputed && self.require_dispute_notes && notes.is_none() {
            return Err(RegistryError::Validation(
                "a dispute must explain the discrepancy".into(),
            ));
        }

        Ok(())
    }
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

/// One id that failed in a bulk transition.
#[derive(Debug)]
pub struct BulkFailure {
    pub id: RecordId,
    pub error: RegistryError,
}

/// Outcome of a bulk transition. Successes are never rolled back.
#[derive(Debug, Default)]
pub struct BulkTransitionReport {
    pub succeeded: Vec<RecordId>,
    pub failed: Vec<BulkFailure>,
}

impl BulkTransitionReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn failed_ids(&self) -> Vec<RecordId> {
        self.failed.iter().map(|f| f.id).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives records through the validation states.
///
/// No optimistic concurrency: when two callers transition the same record,
/// the later write wins.
pub struct ValidationWorkflow {
    store: Arc<RecordStore>,
    policy: TransitionPolicy,
}

impl ValidationWorkflow {
    pub fn new(store: Arc<RecordStore>, policy: TransitionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    /// Move one record to `target`, stamping who did it and when.
    ///
    /// Empty notes count as no notes and leave any earlier notes in place.
    pub fn transition(
        &self,
        id: RecordId,
        target: ValidationStatus,
        acting_user: &str,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord> {
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        let now = self.store.now();

        self.store.update_validation(id, |current| {
            self.policy.check(current.status(), target, notes)?;
            Ok(ValidationPatch {
                status: target,
                updated_by: acting_user.to_string(),
                updated_at: now,
                notes: notes.map(str::to_string),
            })
        })
    }

    /// Transition every id independently and in parallel.
    ///
    /// Report order follows `ids`.
    pub fn transition_many(
        &self,
        ids: &[RecordId],
        target: ValidationStatus,
        acting_user: &str,
    ) -> BulkTransitionReport {
        let outcomes: Vec<(RecordId, Result<RegistrationRecord>)> = ids
            .par_iter()
            .map(|&id| (id, self.transition(id, target, acting_user, None)))
            .collect();

        let mut report = BulkTransitionReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.succeeded.push(id),
                Err(error) => {
                    warn!(record = id.0, %error, "bulk transition failed for record");
                    report.failed.push(BulkFailure { id, error });
                }
            }
        }

        info!(
            status = %target,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            "bulk transition finished"
        );
        report
    }
}
