//! Main RecordStore struct tying the journal, index and subscriptions together.

use crate::clock::{SystemTimeSource, TimeSource};
use crate::error::{RegistryError, Result};
use crate::records::{JournalEntry, RecordIndex, RegistrationJournal};
use crate::subscriptions::{
    RecordChange, RecordFilter, SortOrder, SubscriptionConfig, SubscriptionHandle,
    SubscriptionManager,
};
use crate::types::{
    OrderKey, RecordId, RegistrationInput, RegistrationRecord, Timestamp, ValidationPatch,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the journal every N writes (0 and 1 both mean every write).
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./registrations"),
            create_if_missing: true,
            sync_interval: RegistrationJournal::DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// One page of a cursor-paginated listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub records: Vec<RegistrationRecord>,
    /// Pass back to get the following page; `None` once exhausted.
    pub next_cursor: Option<OrderKey>,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"RGS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const JOURNAL_FILE: &str = "registrations.journal";

/// The registration record store.
///
/// Provides a unified interface for:
/// - Creating, reading, listing and deleting records
/// - Patching a record's financial validation
/// - Live subscriptions that see every mutation
///
/// Mutations are serialized. Each is journaled, applied to the index, and
/// published to subscribers before the next one starts.
pub struct RecordStore {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    journal: RegistrationJournal,

    index: RwLock<RecordIndex>,

    subscriptions: Arc<SubscriptionManager>,

    clock: Arc<dyn TimeSource>,

    /// Next record ID to assign.
    next_id: AtomicU64,

    /// Lock for write operations to ensure atomicity.
    write_lock: Mutex<()>,
}

impl RecordStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create_new(config)
        } else {
            Err(RegistryError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create_new(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::load(config)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        Self::load(config)
    }

    fn load(config: StoreConfig) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let (journal, entries) =
            RegistrationJournal::open(config.path.join(JOURNAL_FILE), config.sync_interval)?;
        let (index, max_id) = Self::rebuild_index(entries);

        info!(
            path = %config.path.display(),
            records = index.len(),
            "registration store opened"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            journal,
            index: RwLock::new(index),
            subscriptions: Arc::new(SubscriptionManager::new()),
            clock: Arc::new(SystemTimeSource),
            next_id: AtomicU64::new(max_id + 1),
            write_lock: Mutex::new(()),
        })
    }

    /// Replace the server clock.
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Rebuild the index from the journal. Also returns the highest id ever
    /// assigned, deleted records included, so ids are never reused.
    fn rebuild_index(entries: Vec<JournalEntry>) -> (RecordIndex, u64) {
        let mut index = RecordIndex::new();
        let mut max_id = 0u64;

        for entry in entries {
            max_id = max_id.max(entry.record_id().0);
            match entry {
                JournalEntry::Create(record) => index.insert(record),
                JournalEntry::Patch { id, patch } => {
                    if index.apply_patch(id, &patch).is_none() {
                        warn!(record = id.0, "journal patch for unknown record ignored");
                    }
                }
                JournalEntry::Delete { id, .. } => {
                    index.remove(id);
                }
            }
        }

        (index, max_id)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn time_source(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.clock)
    }

    /// Current server time.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // --- Record Operations ---

    /// Persist a new registration and return its id.
    pub fn create(&self, input: RegistrationInput) -> Result<RecordId> {
        self.create_record(input).map(|record| record.id)
    }

    /// Persist a new registration and return the stored record.
    ///
    /// The store assigns the id, the creation timestamp and the pending
    /// validation state; nothing in `input` can override them.
    pub fn create_record(&self, input: RegistrationInput) -> Result<RegistrationRecord> {
        input.validate()?;

        let _lock = self.write_lock.lock();

        let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = input.into_record(id, self.clock.now());

        self.journal.append(&JournalEntry::Create(record.clone()))?;
        self.index.write().insert(record.clone());

        debug!(record = id.0, programme = %record.programme, agent = %record.collected_by_uid, "record created");
        self.publish(RecordChange::Created(record.clone()));

        Ok(record)
    }

    /// Permanently remove a record.
    pub fn delete(&self, id: RecordId) -> Result<()> {
        let _lock = self.write_lock.lock();

        if !self.index.read().contains(id) {
            return Err(RegistryError::RecordNotFound(id));
        }

        self.journal.append(&JournalEntry::Delete {
            id,
            at: self.clock.now(),
        })?;
        let removed = self
            .index
            .write()
            .remove(id)
            .ok_or(RegistryError::RecordNotFound(id))?;

        debug!(record = id.0, "record deleted");
        self.publish(RecordChange::Deleted(removed));

        Ok(())
    }

    /// Get a record by ID.
    pub fn read(&self, id: RecordId) -> Result<RegistrationRecord> {
        self.index
            .read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::RecordNotFound(id))
    }

    /// Matching records in `order`, at most `limit`.
    pub fn list(&self, filter: &RecordFilter, order: SortOrder, limit: usize) -> Vec<RegistrationRecord> {
        self.index.read().query(filter, order, limit)
    }

    /// The `limit` most recent records.
    pub fn recent(&self, limit: usize) -> Vec<RegistrationRecord> {
        self.list(&RecordFilter::all(), SortOrder::NewestFirst, limit)
    }

    /// Newest-first page of matching records after `after`.
    pub fn list_page(
        &self,
        filter: &RecordFilter,
        page_size: usize,
        after: Option<OrderKey>,
    ) -> Page {
        let records = self.index.read().page_after(filter, after, page_size);
        let next_cursor = if page_size > 0 && records.len() == page_size {
            records.last().map(|r| r.order_key())
        } else {
            None
        };
        Page {
            records,
            next_cursor,
        }
    }

    /// Apply a validation patch.
    pub fn patch(&self, id: RecordId, patch: ValidationPatch) -> Result<RegistrationRecord> {
        self.update_validation(id, |_| Ok(patch))
    }

    /// Atomically read a record, derive a patch from it, and apply the patch.
    ///
    /// No other mutation runs between `derive` seeing the record and the
    /// patch landing. A patch timestamp earlier than the record's creation
    /// time is raised to the creation time.
    pub fn update_validation<F>(&self, id: RecordId, derive: F) -> Result<RegistrationRecord>
    where
        F: FnOnce(&RegistrationRecord) -> Result<ValidationPatch>,
    {
        let _lock = self.write_lock.lock();

        let current = self.read(id)?;
        let mut patch = derive(&current)?;
        if patch.updated_at < current.created_at {
            patch.updated_at = current.created_at;
        }

        self.journal.append(&JournalEntry::Patch {
            id,
            patch: patch.clone(),
        })?;
        let (before, after) = self
            .index
            .write()
            .apply_patch(id, &patch)
            .ok_or(RegistryError::RecordNotFound(id))?;

        debug!(record = id.0, status = %after.status(), by = %patch.updated_by, "validation patched");
        self.publish(RecordChange::Patched {
            before,
            after: after.clone(),
        });

        Ok(after)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    // --- Subscriptions ---

    /// Open a live subscription. The first snapshot is available immediately.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        // No mutation may land between the initial snapshot and registration.
        let _lock = self.write_lock.lock();
        let initial = self.list(&config.filter, config.order, config.limit);
        self.subscriptions.register(config, initial)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    /// Must be called with the write lock held.
    fn publish(&self, change: RecordChange) {
        let index = self.index.read();
        self.subscriptions
            .publish(&change, |filter, order, limit| index.query(filter, order, limit));
    }

    /// Force sync all pending journal writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.journal.sync()
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(RegistryError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(RegistryError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(RegistryError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| RegistryError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::types::{PaymentMethod, ValidationStatus};
    use rust_decimal::Decimal;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> RecordStore {
        RecordStore::create_new(StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        })
        .unwrap()
    }

    fn input(student_id: &str, programme: &str, agent: &str) -> RegistrationInput {
        RegistrationInput {
            full_name: "Kwame Boateng".into(),
            student_id: student_id.into(),
            email: "kwame@example.edu".into(),
            programme: programme.into(),
            program_level: "Level 100".into(),
            sex: "M".into(),
            phone: "0244000000".into(),
            payment_method: PaymentMethod::MobileMoney,
            amount_paid: Decimal::new(5000, 2),
            souvenirs: vec!["Lanyard".into()],
            collected_by: format!("Agent {agent}"),
            collected_by_uid: agent.into(),
        }
    }

    #[test]
    fn test_create_and_read() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let id = store.create(input("UG0000001", "Nursing", "a1")).unwrap();
        let record = store.read(id).unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.status(), ValidationStatus::Pending);
        assert_eq!(record.financial_validation.updated_by, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_input_not_persisted() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let result = store.create(input("SHORT", "Nursing", "a1"));
        assert!(matches!(result, Err(RegistryError::Validation(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_missing() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let result = store.delete(RecordId(42));
        assert!(matches!(result, Err(RegistryError::RecordNotFound(RecordId(42)))));
    }

    #[test]
    fn test_patch_timestamp_never_before_creation() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualTimeSource::new(Timestamp(5_000)));
        let store = test_store(&dir).with_time_source(clock.clone());

        let id = store.create(input("UG0000001", "Nursing", "a1")).unwrap();
        let after = store
            .patch(
                id,
                ValidationPatch {
                    status: ValidationStatus::Validated,
                    updated_by: "fin".into(),
                    updated_at: Timestamp(1),
                    notes: None,
                },
            )
            .unwrap();

        assert_eq!(after.financial_validation.updated_at, Some(Timestamp(5_000)));
    }

    #[test]
    fn test_reopen_replays_journal() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        };

        let (kept, deleted) = {
            let store = RecordStore::create_new(config.clone()).unwrap();
            let kept = store.create(input("UG0000001", "Nursing", "a1")).unwrap();
            let deleted = store.create(input("UG0000002", "Nursing", "a1")).unwrap();
            store
                .patch(
                    kept,
                    ValidationPatch {
                        status: ValidationStatus::Disputed,
                        updated_by: "fin".into(),
                        updated_at: store.now(),
                        notes: Some("short by 5".into()),
                    },
                )
                .unwrap();
            store.delete(deleted).unwrap();
            (kept, deleted)
        };

        let store = RecordStore::open(config).unwrap();
        assert_eq!(store.len(), 1);
        let record = store.read(kept).unwrap();
        assert_eq!(record.status(), ValidationStatus::Disputed);
        assert_eq!(record.financial_validation.notes.as_deref(), Some("short by 5"));
        assert!(store.read(deleted).is_err());

        // Ids are not reused after a delete
        let next = store.create(input("UG0000003", "Nursing", "a1")).unwrap();
        assert!(next > deleted);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        };
        let _store = RecordStore::create_new(config.clone()).unwrap();

        let result = RecordStore::open(config);
        assert!(matches!(result, Err(RegistryError::Locked)));
    }

    #[test]
    fn test_open_missing_store() {
        let dir = TempDir::new().unwrap();
        let result = RecordStore::open_or_create(StoreConfig {
            path: dir.path().join("nowhere"),
            create_if_missing: false,
            ..Default::default()
        });
        assert!(matches!(result, Err(RegistryError::NotInitialized)));
    }

    #[test]
    fn test_subscription_sees_delete() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = store.create(input("UG0000001", "Nursing", "a1")).unwrap();

        let handle = store.subscribe(SubscriptionConfig::default());
        let initial = handle.next_snapshot(Duration::from_millis(100)).unwrap();
        assert_eq!(initial.ids(), vec![id]);

        store.delete(id).unwrap();
        let after = handle.next_snapshot(Duration::from_millis(100)).unwrap();
        assert!(after.records.is_empty());
    }

    #[test]
    fn test_list_page_cursor() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualTimeSource::new(Timestamp(1_000)));
        let store = test_store(&dir).with_time_source(clock.clone());

        let mut ids = Vec::new();
        for i in 0..5 {
            clock.advance(Duration::from_secs(1));
            ids.push(store.create(input(&format!("UG000000{i}"), "Nursing", "a1")).unwrap());
        }

        let first = store.list_page(&RecordFilter::all(), 2, None);
        assert_eq!(first.records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let second = store.list_page(&RecordFilter::all(), 2, first.next_cursor);
        assert_eq!(second.records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let third = store.list_page(&RecordFilter::all(), 2, second.next_cursor);
        assert_eq!(third.records.len(), 1);
        assert_eq!(third.next_cursor, None);
    }
}
