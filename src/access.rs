//! Caller identity and role-derived visibility.
//!
//! Every query a caller makes goes through [`scope_for`] first. Executives are
//! pinned to the records they collected; finance and president roles see
//! everything; anything else is refused before the store is touched.

use crate::error::{RegistryError, Result};
use crate::subscriptions::RecordFilter;
use crate::types::RegistrationRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    President,
    FinancialOfficer,
    Executive,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::President => "president",
            Role::FinancialOfficer => "financial_officer",
            Role::Executive => "executive",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "president" => Ok(Role::President),
            "financial_officer" => Ok(Role::FinancialOfficer),
            "executive" => Ok(Role::Executive),
            other => Err(RegistryError::AccessDenied(format!("unrecognized role: {other}"))),
        }
    }
}

/// The authenticated caller, as supplied by the session layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub display_name: String,
    /// `None` when the session carried no recognized role.
    pub role: Option<Role>,
}

impl Caller {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: Some(role),
        }
    }

    /// Build from a raw role string; unknown strings leave the caller roleless.
    pub fn from_session(
        id: impl Into<String>,
        display_name: impl Into<String>,
        role: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: role.and_then(|r| r.parse().ok()),
        }
    }

    pub fn president(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, Role::President)
    }

    pub fn financial_officer(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, Role::FinancialOfficer)
    }

    pub fn executive(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, Role::Executive)
    }

    /// Recognized role, or `AccessDenied`.
    pub fn require_role(&self) -> Result<Role> {
        self.role
            .ok_or_else(|| RegistryError::AccessDenied(format!("caller {} has no role", self.id)))
    }

    /// May the caller move records through the validation workflow?
    pub fn can_transition(&self) -> bool {
        matches!(self.role, Some(Role::FinancialOfficer) | Some(Role::President))
    }

    /// May the caller delete `record`? Presidents may delete anything; other
    /// roles only what they collected themselves.
    pub fn can_delete(&self, record: &RegistrationRecord) -> bool {
        match self.role {
            Some(Role::President) => true,
            Some(_) => record.collected_by_uid == self.id,
            None => false,
        }
    }
}

/// What a caller may see.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessScope {
    /// No extra constraint.
    Full,
    /// Only records collected by this agent id.
    OwnRecords(String),
}

impl AccessScope {
    /// Conjoin the scope with a requested filter.
    ///
    /// An executive asking for another agent's records is refused rather
    /// than silently given their own.
    pub fn apply(&self, mut filter: RecordFilter) -> Result<RecordFilter> {
        match self {
            AccessScope::Full => Ok(filter),
            AccessScope::OwnRecords(uid) => match filter.collected_by_uid {
                Some(ref requested) if requested != uid => Err(RegistryError::AccessDenied(
                    "executives may only view their own registrations".into(),
                )),
                _ => {
                    filter.collected_by_uid = Some(uid.clone());
                    Ok(filter)
                }
            },
        }
    }

    /// The scope as a bare filter.
    pub fn filter(&self) -> RecordFilter {
        match self {
            AccessScope::Full => RecordFilter::all(),
            AccessScope::OwnRecords(uid) => RecordFilter::collected_by(uid.clone()),
        }
    }

    pub fn permits(&self, record: &RegistrationRecord) -> bool {
        match self {
            AccessScope::Full => true,
            AccessScope::OwnRecords(uid) => &record.collected_by_uid == uid,
        }
    }
}

/// Derive the visibility scope for a caller.
pub fn scope_for(caller: &Caller) -> Result<AccessScope> {
    match caller.require_role()? {
        Role::President | Role::FinancialOfficer => Ok(AccessScope::Full),
        Role::Executive => Ok(AccessScope::OwnRecords(caller.id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidationStatus;

    #[test]
    fn test_scope_by_role() {
        assert_eq!(scope_for(&Caller::president("p", "P")).unwrap(), AccessScope::Full);
        assert_eq!(
            scope_for(&Caller::financial_officer("f", "F")).unwrap(),
            AccessScope::Full
        );
        assert_eq!(
            scope_for(&Caller::executive("e1", "E")).unwrap(),
            AccessScope::OwnRecords("e1".into())
        );
    }

    #[test]
    fn test_unknown_role_denied() {
        let caller = Caller::from_session("x", "X", Some("treasurer"));
        assert_eq!(caller.role, None);
        assert!(matches!(scope_for(&caller), Err(RegistryError::AccessDenied(_))));

        let roleless = Caller::from_session("y", "Y", None);
        assert!(matches!(scope_for(&roleless), Err(RegistryError::AccessDenied(_))));
    }

    #[test]
    fn test_executive_scope_pins_agent() {
        let scope = AccessScope::OwnRecords("e1".into());
        let filter = scope
            .apply(RecordFilter::status(ValidationStatus::Pending))
            .unwrap();
        assert_eq!(filter.collected_by_uid.as_deref(), Some("e1"));
        assert_eq!(filter.status, Some(ValidationStatus::Pending));

        let same = scope.apply(RecordFilter::collected_by("e1")).unwrap();
        assert_eq!(same.collected_by_uid.as_deref(), Some("e1"));

        let other = scope.apply(RecordFilter::collected_by("e2"));
        assert!(matches!(other, Err(RegistryError::AccessDenied(_))));
    }

    #[test]
    fn test_full_scope_passes_filter_through() {
        let filter = RecordFilter::collected_by("e2").with_programme("Nursing");
        assert_eq!(AccessScope::Full.apply(filter.clone()).unwrap(), filter);
    }

    #[test]
    fn test_transition_rights() {
        assert!(Caller::president("p", "P").can_transition());
        assert!(Caller::financial_officer("f", "F").can_transition());
        assert!(!Caller::executive("e", "E").can_transition());
        assert!(!Caller::from_session("x", "X", None).can_transition());
    }
}
