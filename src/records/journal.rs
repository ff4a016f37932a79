//! Append-only journal of record mutations.
//!
//! Every create, validation patch and delete is written here before it is
//! applied to the in-memory index. Opening a store replays the journal.

use crate::error::{RegistryError, Result};
use crate::types::{RecordId, RegistrationRecord, Timestamp, ValidationPatch};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for journal entries.
const JOURNAL_MAGIC: &[u8; 4] = b"REG\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

const KIND_CREATE: u8 = 1;
const KIND_PATCH: u8 = 2;
const KIND_DELETE: u8 = 3;

/// A single journaled mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalEntry {
    Create(RegistrationRecord),
    Patch {
        id: RecordId,
        patch: ValidationPatch,
    },
    Delete {
        id: RecordId,
        at: Timestamp,
    },
}

impl JournalEntry {
    pub fn record_id(&self) -> RecordId {
        match self {
            JournalEntry::Create(record) => record.id,
            JournalEntry::Patch { id, .. } | JournalEntry::Delete { id, .. } => *id,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            JournalEntry::Create(_) => KIND_CREATE,
            JournalEntry::Patch { .. } => KIND_PATCH,
            JournalEntry::Delete { .. } => KIND_DELETE,
        }
    }

    fn timestamp(&self) -> Timestamp {
        match self {
            JournalEntry::Create(record) => record.created_at,
            JournalEntry::Patch { patch, .. } => patch.updated_at,
            JournalEntry::Delete { at, .. } => *at,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            JournalEntry::Create(record) => Ok(rmp_serde::to_vec_named(record)?),
            JournalEntry::Patch { patch, .. } => Ok(rmp_serde::to_vec_named(patch)?),
            JournalEntry::Delete { .. } => Ok(Vec::new()),
        }
    }
}

/// Append-only mutation journal.
pub struct RegistrationJournal {
    /// Path to the journal file.
    path: PathBuf,

    /// Journal file handle.
    file: RwLock<File>,

    /// End of the last complete entry.
    file_size: RwLock<u64>,

    /// Number of writes since last sync.
    writes_since_sync: RwLock<u64>,

    /// Sync every N writes.
    sync_interval: u64,

    #[cfg(test)]
    fail_next_sync: std::sync::atomic::AtomicBool,
}

impl RegistrationJournal {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open or create a journal, returning it along with every intact entry.
    ///
    /// A torn entry at the tail (crash mid-write) is discarded and later
    /// appends overwrite it. Corruption anywhere else is an error.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let (entries, valid_len) = Self::replay(&file)?;
        let on_disk = file.metadata()?.len();
        if valid_len < on_disk {
            warn!(
                path = %path.display(),
                discarded = on_disk - valid_len,
                "discarding torn journal tail"
            );
            file.set_len(valid_len)?;
        }

        let journal = Self {
            path,
            file: RwLock::new(file),
            file_size: RwLock::new(valid_len),
            writes_since_sync: RwLock::new(0),
            sync_interval: if sync_interval == 0 { 1 } else { sync_interval },
            #[cfg(test)]
            fail_next_sync: std::sync::atomic::AtomicBool::new(false),
        };

        Ok((journal, entries))
    }

    /// Append an entry. Returns the offset where it was written.
    ///
    /// If the write or its sync fails the file is cut back to `offset`, so an
    /// entry reported as failed is never replayed.
    pub fn append(&self, entry: &JournalEntry) -> Result<u64> {
        let payload = entry.encode_payload()?;
        let mut buf = Vec::with_capacity(30 + payload.len());

        buf.extend_from_slice(JOURNAL_MAGIC);
        buf.push(JOURNAL_VERSION);
        buf.push(entry.kind());
        buf.extend_from_slice(&entry.record_id().0.to_le_bytes());
        buf.extend_from_slice(&entry.timestamp().0.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        let mut file = self.file.write();
        let mut size = self.file_size.write();
        let mut writes = self.writes_since_sync.write();
        let offset = *size;
        let sync_due = *writes + 1 >= self.sync_interval;

        if let Err(error) = self.write_frame(&mut file, offset, &buf, sync_due) {
            if let Err(truncate_error) = file.set_len(offset) {
                warn!(
                    path = %self.path.display(),
                    offset,
                    %truncate_error,
                    "could not roll back failed journal append"
                );
            }
            return Err(error.into());
        }

        *size = offset + buf.len() as u64;
        *writes = if sync_due { 0 } else { *writes + 1 };

        Ok(offset)
    }

    fn write_frame(&self, file: &mut File, offset: u64, buf: &[u8], sync: bool) -> io::Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        if sync {
            self.sync_data(file)?;
        }
        Ok(())
    }

    fn sync_data(&self, file: &File) -> io::Result<()> {
        #[cfg(test)]
        if self
            .fail_next_sync
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(io::Error::new(ErrorKind::Other, "sync failed"));
        }
        file.sync_data()
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.write();
        file.sync_all()?;
        *self.writes_since_sync.write() = 0;
        Ok(())
    }

    /// Bytes of intact entries.
    pub fn size(&self) -> u64 {
        *self.file_size.read()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every intact entry. Returns them with the byte length they cover.
    fn replay(file: &File) -> Result<(Vec<JournalEntry>, u64)> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut offset = 0u64;

        loop {
            match Self::read_entry(&mut reader) {
                Ok(Some((entry, len))) => {
                    entries.push(entry);
                    offset += len;
                }
                Ok(None) => break,
                Err(RegistryError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((entries, offset))
    }

    /// Read one entry. `Ok(None)` on a clean end of file.
    fn read_entry(reader: &mut impl Read) -> Result<Option<(JournalEntry, u64)>> {
        // Magic
        let mut magic = [0u8; 4];
        match reader.read(&mut magic[..1])? {
            0 => return Ok(None),
            _ => reader.read_exact(&mut magic[1..])?,
        }
        if &magic != JOURNAL_MAGIC {
            return Err(RegistryError::InvalidFormat("Invalid journal magic".into()));
        }

        // Version + kind
        let mut header = [0u8; 2];
        reader.read_exact(&mut header)?;
        if header[0] != JOURNAL_VERSION {
            return Err(RegistryError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                header[0]
            )));
        }
        let kind = header[1];

        let mut id_bytes = [0u8; 8];
        reader.read_exact(&mut id_bytes)?;
        let id = RecordId(u64::from_le_bytes(id_bytes));

        let mut ts_bytes = [0u8; 8];
        reader.read_exact(&mut ts_bytes)?;
        let timestamp = Timestamp(i64::from_le_bytes(ts_bytes));

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let payload_len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(RegistryError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let entry = match kind {
            KIND_CREATE => {
                let record: RegistrationRecord = rmp_serde::from_slice(&payload)?;
                if record.id != id {
                    return Err(RegistryError::InvalidFormat(format!(
                        "journal header id {} does not match record id {}",
                        id, record.id
                    )));
                }
                JournalEntry::Create(record)
            }
            KIND_PATCH => JournalEntry::Patch {
                id,
                patch: rmp_serde::from_slice(&payload)?,
            },
            KIND_DELETE => JournalEntry::Delete { id, at: timestamp },
            other => {
                return Err(RegistryError::InvalidFormat(format!(
                    "Unknown journal entry kind: {other}"
                )))
            }
        };

        let len = (4 + 2 + 8 + 8 + 4 + payload_len + 4) as u64;
        Ok(Some((entry, len)))
    }
}
