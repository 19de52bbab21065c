//! Journal recovery utilities.
//!
//! A crash in the middle of an append leaves an incomplete record at the end
//! of the file. That tail is safe to drop: the mutation it describes was never
//! applied in memory. A checksum failure or a sequence gap anywhere else means
//! the audit trail has been tampered with or damaged, and is reported instead
//! of repaired.

use crate::entry::JournalRecord;
use crate::error::JournalError;
use crate::JOURNAL_FILE;
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

/// Result of a journal scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of valid records found.
    pub valid_records: u64,
    /// Bytes after the last valid record.
    pub bytes_truncated: u64,
    /// Highest sequence number found (0 for an empty journal).
    pub max_sequence: u64,
    /// Offset just past the last valid record.
    pub valid_len: u64,
}

impl RecoveryResult {
    /// Returns true if the journal has no torn tail.
    pub fn is_clean(&self) -> bool {
        self.bytes_truncated == 0
    }
}

/// Reads every valid record of a journal file, in order.
///
/// Stops quietly at an incomplete tail; fails on corruption.
pub(crate) fn read_records(path: &Path) -> Result<(Vec<JournalRecord>, u64, u64), JournalError> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut buf = BytesMut::with_capacity(file_size as usize);
    buf.resize(file_size as usize, 0);
    file.read_exact(&mut buf)?;

    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut expected_sequence = 1u64;

    while let Some(record) = JournalRecord::decode(&mut buf, offset)? {
        if record.header.sequence != expected_sequence {
            return Err(JournalError::SequenceGap {
                offset,
                expected: expected_sequence,
                found: record.header.sequence,
            });
        }
        expected_sequence += 1;
        offset += record.disk_size() as u64;
        records.push(record);
    }

    Ok((records, offset, file_size))
}

/// Scans and optionally repairs the journal in `dir`.
pub fn scan(dir: impl AsRef<Path>, repair: bool) -> Result<RecoveryResult, JournalError> {
    let path = dir.as_ref().join(JOURNAL_FILE);
    if !path.exists() {
        return Ok(RecoveryResult::default());
    }

    let (records, valid_len, file_size) = read_records(&path)?;
    let result = RecoveryResult {
        valid_records: records.len() as u64,
        bytes_truncated: file_size - valid_len,
        max_sequence: records.last().map(|r| r.header.sequence).unwrap_or(0),
        valid_len,
    };

    if repair && !result.is_clean() {
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        tracing::warn!(
            "Truncated journal {} at offset {} (removed {} bytes)",
            path.display(),
            valid_len,
            result.bytes_truncated
        );
    }

    Ok(result)
}

/// Verifies journal integrity without modifying anything.
pub fn verify_journal(dir: impl AsRef<Path>) -> Result<RecoveryResult, JournalError> {
    scan(dir, false)
}

/// Repairs the journal by truncating a torn tail.
pub fn repair_journal(dir: impl AsRef<Path>) -> Result<RecoveryResult, JournalError> {
    scan(dir, true)
}
