//! # permfsm-journal
//!
//! Append-only journal of state machine mutations.
//!
//! This crate provides:
//! - Per-record checksums for corruption detection
//! - Strictly increasing sequence numbers
//! - Configurable fsync policies
//! - Recovery from torn writes at the end of the journal

pub mod entry;
pub mod error;
pub mod journal;
pub mod recovery;

pub use entry::{JournalEntry, JournalEntryType, JournalRecord};
pub use error::JournalError;
pub use journal::{FsyncPolicy, Journal, JournalConfig};
pub use recovery::{repair_journal, verify_journal, RecoveryResult};

/// Journal file name inside the configured directory.
pub const JOURNAL_FILE: &str = "machine.journal";

/// Journal record header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 24;
