//! Core types for the registration store.

use crate::error::{RegistryError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Required length of a student id.
pub const STUDENT_ID_LEN: usize = 9;

/// Souvenir list entry stored when nothing was handed out.
pub const NO_SOUVENIRS: &str = "None";

/// Unique identifier for a record, assigned by the store.
///
/// Ids are handed out in increasing order, which makes them a stable
/// tie-breaker for records created within the same microsecond.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1000
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let micros = self.0.saturating_sub(earlier.0).max(0);
        Duration::from_micros(micros as u64)
    }

    pub fn saturating_add(&self, d: Duration) -> Self {
        let micros = i64::try_from(d.as_micros()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(micros))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// How the registration fee was collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "MoMo")]
    MobileMoney,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::MobileMoney => "MoMo",
            PaymentMethod::Cash => "Cash",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MoMo" | "MobileMoney" | "Mobile Money" => Ok(PaymentMethod::MobileMoney),
            "Cash" => Ok(PaymentMethod::Cash),
            other => Err(RegistryError::Validation(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

/// Financial review state of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Disputed,
}

impl ValidationStatus {
    pub const ALL: [ValidationStatus; 3] = [
        ValidationStatus::Pending,
        ValidationStatus::Validated,
        ValidationStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Disputed => "disputed",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ValidationStatus::Pending),
            "validated" => Ok(ValidationStatus::Validated),
            "disputed" => Ok(ValidationStatus::Disputed),
            other => Err(RegistryError::Validation(format!(
                "unknown validation status: {other}"
            ))),
        }
    }
}

/// Financial validation sub-state embedded in every record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialValidation {
    pub status: ValidationStatus,
    pub updated_by: Option<String>,
    pub updated_at: Option<Timestamp>,
    pub notes: Option<String>,
}

impl FinancialValidation {
    /// State every record is created in.
    pub fn pending() -> Self {
        Self {
            status: ValidationStatus::Pending,
            updated_by: None,
            updated_at: None,
            notes: None,
        }
    }
}

/// Partial update of a record's financial validation.
///
/// This is the only mutation the store accepts on an existing record; id,
/// creation time, descriptive fields and provenance have no patch form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPatch {
    pub status: ValidationStatus,
    pub updated_by: String,
    pub updated_at: Timestamp,
    /// Replaces the stored notes when present; absent keeps the old notes.
    pub notes: Option<String>,
}

impl ValidationPatch {
    pub(crate) fn apply_to(&self, validation: &mut FinancialValidation) {
        validation.status = self.status;
        validation.updated_by = Some(self.updated_by.clone());
        validation.updated_at = Some(self.updated_at);
        if let Some(ref notes) = self.notes {
            validation.notes = Some(notes.clone());
        }
    }
}

/// Listing position of a record: creation time, then id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub created_at: Timestamp,
    pub id: RecordId,
}

/// A single student registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Unique identifier (assigned by store).
    pub id: RecordId,

    /// When the store persisted the record.
    pub created_at: Timestamp,

    pub full_name: String,
    pub student_id: String,
    pub email: String,
    pub programme: String,
    pub program_level: String,
    pub sex: String,
    pub phone: String,

    pub payment_method: PaymentMethod,
    pub amount_paid: Decimal,
    /// Never empty; `["None"]` when no souvenirs were given.
    pub souvenirs: Vec<String>,

    /// Display name of the collecting agent.
    pub collected_by: String,
    /// Unique id of the collecting agent.
    pub collected_by_uid: String,

    pub financial_validation: FinancialValidation,
}

impl RegistrationRecord {
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn status(&self) -> ValidationStatus {
        self.financial_validation.status
    }
}

/// Input for creating a new record (before id, timestamp and validation
/// state are assigned).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationInput {
    pub full_name: String,
    pub student_id: String,
    pub email: String,
    pub programme: String,
    pub program_level: String,
    pub sex: String,
    pub phone: String,
    pub payment_method: PaymentMethod,
    pub amount_paid: Decimal,
    #[serde(default)]
    pub souvenirs: Vec<String>,
    pub collected_by: String,
    pub collected_by_uid: String,
}

impl RegistrationInput {
    /// Check required fields, the student id length and the amount.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("full_name", &self.full_name),
            ("student_id", &self.student_id),
            ("email", &self.email),
            ("programme", &self.programme),
            ("program_level", &self.program_level),
            ("sex", &self.sex),
            ("phone", &self.phone),
            ("collected_by", &self.collected_by),
            ("collected_by_uid", &self.collected_by_uid),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RegistryError::Validation(format!("{field} is required")));
            }
        }

        let id_len = self.student_id.chars().count();
        if id_len != STUDENT_ID_LEN {
            return Err(RegistryError::Validation(format!(
                "student_id must be exactly {STUDENT_ID_LEN} characters, got {id_len}"
            )));
        }

        if self.amount_paid < Decimal::ZERO {
            return Err(RegistryError::Validation(format!(
                "amount_paid must not be negative, got {}",
                self.amount_paid
            )));
        }

        Ok(())
    }

    /// Build the stored record. Callers must have run [`validate`](Self::validate).
    pub(crate) fn into_record(self, id: RecordId, created_at: Timestamp) -> RegistrationRecord {
        let souvenirs = if self.souvenirs.is_empty() {
            vec![NO_SOUVENIRS.to_string()]
        } else {
            self.souvenirs
        };

        RegistrationRecord {
            id,
            created_at,
            full_name: self.full_name,
            student_id: self.student_id,
            email: self.email,
            programme: self.programme,
            program_level: self.program_level,
            sex: self.sex,
            phone: self.phone,
            payment_method: self.payment_method,
            amount_paid: self.amount_paid,
            souvenirs,
            collected_by: self.collected_by,
            collected_by_uid: self.collected_by_uid,
            financial_validation: FinancialValidation::pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RegistrationInput {
        RegistrationInput {
            full_name: "Ama Mensah".into(),
            student_id: "UG1234567".into(),
            email: "ama@example.edu".into(),
            programme: "Cybersecurity".into(),
            program_level: "Level 100".into(),
            sex: "F".into(),
            phone: "0240000000".into(),
            payment_method: PaymentMethod::Cash,
            amount_paid: Decimal::new(5000, 2),
            souvenirs: vec![],
            collected_by: "Kofi".into(),
            collected_by_uid: "exec-1".into(),
        }
    }

    #[test]
    fn test_valid_input() {
        assert!(input().validate().is_ok());
    }

    #[test]
    fn test_student_id_length() {
        let mut short = input();
        short.student_id = "UG12".into();
        assert!(matches!(short.validate(), Err(RegistryError::Validation(_))));

        let mut long = input();
        long.student_id = "UG123456789".into();
        assert!(matches!(long.validate(), Err(RegistryError::Validation(_))));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let mut bad = input();
        bad.amount_paid = Decimal::new(-1, 2);
        assert!(matches!(bad.validate(), Err(RegistryError::Validation(_))));

        let mut zero = input();
        zero.amount_paid = Decimal::ZERO;
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut bad = input();
        bad.email = "  ".into();
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn test_empty_souvenirs_become_sentinel() {
        let record = input().into_record(RecordId(1), Timestamp(10));
        assert_eq!(record.souvenirs, vec![NO_SOUVENIRS.to_string()]);
        assert_eq!(record.status(), ValidationStatus::Pending);
    }

    #[test]
    fn test_patch_keeps_notes_when_absent() {
        let mut fv = FinancialValidation::pending();
        ValidationPatch {
            status: ValidationStatus::Disputed,
            updated_by: "fin".into(),
            updated_at: Timestamp(5),
            notes: Some("amount mismatch".into()),
        }
        .apply_to(&mut fv);

        ValidationPatch {
            status: ValidationStatus::Validated,
            updated_by: "fin".into(),
            updated_at: Timestamp(6),
            notes: None,
        }
        .apply_to(&mut fv);

        assert_eq!(fv.status, ValidationStatus::Validated);
        assert_eq!(fv.notes.as_deref(), Some("amount mismatch"));
        assert_eq!(fv.updated_at, Some(Timestamp(6)));
    }

    #[test]
    fn test_order_key_sorts_by_time_then_id() {
        let a = OrderKey { created_at: Timestamp(1), id: RecordId(9) };
        let b = OrderKey { created_at: Timestamp(2), id: RecordId(1) };
        let c = OrderKey { created_at: Timestamp(2), id: RecordId(2) };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("disputed".parse::<ValidationStatus>().unwrap(), ValidationStatus::Disputed);
        assert!("approved".parse::<ValidationStatus>().is_err());
        assert_eq!("MoMo".parse::<PaymentMethod>().unwrap(), PaymentMethod::MobileMoney);
    }
}
