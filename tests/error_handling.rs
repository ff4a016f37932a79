//! Error handling and edge case tests.

use registration_store::{
    Caller, NoopNotifier, NotifyError, PaymentMethod, PortalConfig, RecordFilter, RecordId,
    RecordStore, RegistrationInput, RegistrationNotice, RegistrationNotifier, RegistrationPortal,
    RegistryError, StoreConfig, ValidationStatus,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> PortalConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    PortalConfig {
        store: StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn test_portal(dir: &TempDir) -> RegistrationPortal {
    RegistrationPortal::open(test_config(dir), Arc::new(NoopNotifier)).unwrap()
}

fn registration(student_id: &str) -> RegistrationInput {
    RegistrationInput {
        full_name: "Kwame Mensah".into(),
        student_id: student_id.into(),
        email: "kwame@students.example.edu".into(),
        programme: "Computer Science".into(),
        program_level: "Level 100".into(),
        sex: "M".into(),
        phone: "0201234567".into(),
        payment_method: PaymentMethod::Cash,
        amount_paid: Decimal::new(5000, 2),
        souvenirs: vec![],
        collected_by: String::new(),
        collected_by_uid: String::new(),
    }
}

// --- Validation Errors ---

#[test]
fn test_student_id_length_rejected() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let exec = Caller::executive("exec-1", "Kofi");

    for bad in ["12345678", "1234567890", ""] {
        let result = portal.submit_registration(&exec, registration(bad));
        assert!(matches!(result, Err(RegistryError::Validation(_))), "{bad:?}");
    }

    assert!(portal.store().is_empty());
}

#[test]
fn test_blank_required_field_rejected() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let exec = Caller::executive("exec-1", "Kofi");

    let mut input = registration("UG1000001");
    input.full_name = "   ".into();
    assert!(matches!(
        portal.submit_registration(&exec, input),
        Err(RegistryError::Validation(_))
    ));

    let mut input = registration("UG1000001");
    input.programme = String::new();
    assert!(matches!(
        portal.submit_registration(&exec, input),
        Err(RegistryError::Validation(_))
    ));

    assert!(portal.store().is_empty());
}

#[test]
fn test_negative_amount_rejected() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let exec = Caller::executive("exec-1", "Kofi");

    let mut input = registration("UG1000001");
    input.amount_paid = Decimal::new(-1, 2);
    assert!(matches!(
        portal.submit_registration(&exec, input),
        Err(RegistryError::Validation(_))
    ));
}

#[test]
fn test_zero_amount_and_no_souvenirs() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let exec = Caller::executive("exec-1", "Kofi");

    let mut input = registration("UG1000001");
    input.amount_paid = Decimal::ZERO;
    let id = portal.submit_registration(&exec, input).unwrap();

    let record = portal.store().read(id).unwrap();
    assert_eq!(record.souvenirs, vec!["None".to_string()]);
    assert_eq!(record.amount_paid, Decimal::ZERO);
}

#[test]
fn test_pending_only_policy_rejects_redecision() {
    let dir = TempDir::new().unwrap();
    let config = PortalConfig {
        transition_policy: registration_store::TransitionPreset::PendingOnly,
        require_dispute_notes: true,
        ..test_config(&dir)
    };
    let portal = RegistrationPortal::open(config, Arc::new(NoopNotifier)).unwrap();
    let exec = Caller::executive("exec-1", "Kofi");
    let finance = Caller::financial_officer("fin-1", "Efua");

    let id = portal.submit_registration(&exec, registration("UG1000001")).unwrap();

    // Disputes need notes under this configuration; blank notes do not count
    assert!(matches!(
        portal.transition(&finance, id, ValidationStatus::Disputed, Some("  ")),
        Err(RegistryError::Validation(_))
    ));

    portal
        .transition(&finance, id, ValidationStatus::Validated, None)
        .unwrap();
    assert!(matches!(
        portal.transition(&finance, id, ValidationStatus::Disputed, Some("late")),
        Err(RegistryError::Validation(_))
    ));

    let record = portal.store().read(id).unwrap();
    assert_eq!(record.status(), ValidationStatus::Validated);
}

// --- Not Found ---

#[test]
fn test_transition_missing_record() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let finance = Caller::financial_officer("fin-1", "Efua");

    let result = portal.transition(&finance, RecordId(404), ValidationStatus::Validated, None);
    assert!(matches!(result, Err(RegistryError::RecordNotFound(RecordId(404)))));
}

#[test]
fn test_president_delete_missing_record() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let president = Caller::president("pres-1", "Nana");

    assert!(matches!(
        portal.delete_registration(&president, RecordId(7)),
        Err(RegistryError::RecordNotFound(_))
    ));
}

#[test]
fn test_deleted_id_is_not_reused() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let exec = Caller::executive("exec-1", "Kofi");

    let first = portal.submit_registration(&exec, registration("UG1000001")).unwrap();
    portal.delete_registration(&exec, first).unwrap();
    let second = portal.submit_registration(&exec, registration("UG1000002")).unwrap();

    assert!(second > first);
    assert!(matches!(
        portal.store().read(first),
        Err(RegistryError::RecordNotFound(_))
    ));
}

// --- Access Errors ---

#[test]
fn test_roleless_caller_denied_everywhere() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let nobody = Caller::from_session("uid-9", "Guest", Some("treasurer"));
    assert!(nobody.role.is_none());

    assert!(matches!(
        portal.submit_registration(&nobody, registration("UG1000001")),
        Err(RegistryError::AccessDenied(_))
    ));
    assert!(matches!(
        portal.subscribe(&nobody, RecordFilter::all(), None),
        Err(RegistryError::AccessDenied(_))
    ));
    assert!(matches!(
        portal.list(&nobody, RecordFilter::all(), None),
        Err(RegistryError::AccessDenied(_))
    ));
    assert!(matches!(portal.stats(&nobody, false), Err(RegistryError::AccessDenied(_))));
    assert!(matches!(
        portal.search(&nobody, "kwame", None),
        Err(RegistryError::AccessDenied(_))
    ));
}

#[test]
fn test_executive_cannot_transition() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let exec = Caller::executive("exec-1", "Kofi");

    let id = portal.submit_registration(&exec, registration("UG1000001")).unwrap();

    assert!(matches!(
        portal.transition(&exec, id, ValidationStatus::Validated, None),
        Err(RegistryError::AccessDenied(_))
    ));
    assert!(matches!(
        portal.validate_many(&exec, &[id]),
        Err(RegistryError::AccessDenied(_))
    ));
    assert_eq!(portal.store().read(id).unwrap().status(), ValidationStatus::Pending);
}

#[test]
fn test_executive_cannot_widen_scope() {
    let dir = TempDir::new().unwrap();
    let portal = test_portal(&dir);
    let kofi = Caller::executive("exec-1", "Kofi");
    let ama = Caller::executive("exec-2", "Ama");

    let theirs = portal.submit_registration(&ama, registration("UG1000001")).unwrap();

    assert!(matches!(
        portal.subscribe(&kofi, RecordFilter::collected_by("exec-2"), None),
        Err(RegistryError::AccessDenied(_))
    ));
    // Asking for their own uid explicitly is fine
    assert!(portal
        .subscribe(&kofi, RecordFilter::collected_by("exec-1"), None)
        .is_ok());

    // Out-of-scope and missing records look the same
    assert!(matches!(portal.read(&kofi, theirs), Err(RegistryError::AccessDenied(_))));
    assert!(matches!(
        portal.read(&kofi, RecordId(999)),
        Err(RegistryError::AccessDenied(_))
    ));
    assert!(matches!(
        portal.delete_registration(&kofi, theirs),
        Err(RegistryError::AccessDenied(_))
    ));
    assert!(portal.store().read(theirs).is_ok());
}

// --- Notification Errors ---

#[derive(Default)]
struct FailingNotifier {
    attempts: Mutex<Vec<RegistrationNotice>>,
}

impl RegistrationNotifier for FailingNotifier {
    fn notify(&self, notice: &RegistrationNotice) -> Result<(), NotifyError> {
        self.attempts.lock().push(notice.clone());
        Err(NotifyError("mail relay refused connection".into()))
    }
}

#[test]
fn test_notification_failure_does_not_fail_create() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(FailingNotifier::default());
    let exec = Caller::executive("exec-1", "Kofi");

    let id = {
        let portal = RegistrationPortal::open(test_config(&dir), notifier.clone()).unwrap();
        let id = portal.submit_registration(&exec, registration("UG1000001")).unwrap();
        assert!(portal.store().read(id).is_ok());

        // Rejected input never reaches the notifier
        let _ = portal.submit_registration(&exec, registration("short"));
        id
        // Dropping the portal drains the notification queue
    };

    let attempts = notifier.attempts.lock();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].student_id, "UG1000001");
    assert_eq!(attempts[0].collected_by, "Kofi");
    assert_eq!(attempts[0].to, "kwame@students.example.edu");

    let store = RecordStore::open(test_config(&dir).store).unwrap();
    assert!(store.read(id).is_ok());
}

// --- Store Errors ---

#[test]
fn test_open_missing_store() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        path: dir.path().join("nowhere"),
        create_if_missing: false,
        ..Default::default()
    };

    assert!(matches!(
        RecordStore::open_or_create(config.clone()),
        Err(RegistryError::NotInitialized)
    ));
    assert!(matches!(RecordStore::open(config), Err(RegistryError::NotInitialized)));
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir).store;

    let _first = RecordStore::create_new(config.clone()).unwrap();
    let second = RecordStore::open(config);

    assert!(matches!(second, Err(RegistryError::Locked)));
}

#[test]
fn test_bad_manifest() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir).store;

    drop(RecordStore::create_new(config.clone()).unwrap());
    fs::write(config.path.join("MANIFEST"), b"NOPE\x01").unwrap();

    let result = RecordStore::open(config);
    assert!(matches!(result, Err(RegistryError::InvalidFormat(_))));
}

#[test]
fn test_corrupted_journal_reports_store_failure() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir).store;

    {
        let store = RecordStore::create_new(config.clone()).unwrap();
        let mut input = registration("UG1000001");
        input.collected_by = "Kofi".into();
        input.collected_by_uid = "exec-1".into();
        store.create(input.clone()).unwrap();
        store.create(input).unwrap();
    }

    let journal = config.path.join("registrations.journal");
    let mut bytes = fs::read(&journal).unwrap();
    bytes[30] ^= 0xFF;
    fs::write(&journal, bytes).unwrap();

    let err = RecordStore::open(config).err().unwrap();
    assert!(err.is_store_failure(), "{err}");
}
