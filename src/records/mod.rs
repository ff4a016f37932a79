//! Record persistence.
//!
//! Mutations are written to an append-only journal and applied to an
//! in-memory index ordered by creation time.

mod index;
mod journal;

pub use index::RecordIndex;
pub use journal::{JournalEntry, RegistrationJournal};
