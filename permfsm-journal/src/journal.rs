//! Main journal implementation.

use crate::entry::{JournalEntry, JournalRecord};
use crate::error::JournalError;
use crate::recovery::{self, read_records};
use crate::JOURNAL_FILE;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fsync policy for journal writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Fsync after every write (safest, slowest).
    #[default]
    EveryWrite,
    /// Fsync after N writes.
    EveryN(u32),
    /// Never fsync automatically (caller must call sync).
    Never,
}

/// Journal configuration.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the journal file.
    pub dir: PathBuf,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync_policy: FsyncPolicy::default(),
        }
    }

    pub fn with_fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }

    /// Path of the journal file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }
}

struct Writer {
    file: File,
    size: u64,
    next_sequence: u64,
    writes_since_sync: u32,
    closed: bool,
}

/// Append-only journal.
///
/// Appends are serialized by an internal lock; a failed append leaves the
/// file exactly as it was before the call.
pub struct Journal {
    config: JournalConfig,
    writer: Mutex<Writer>,
}

impl Journal {
    /// Opens (or creates) the journal, truncating any torn tail.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        std::fs::create_dir_all(&config.dir)?;

        let recovered = recovery::scan(&config.dir, true)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(config.path())?;
        let size = file.metadata()?.len();

        if recovered.valid_records > 0 {
            tracing::debug!(
                "Opened journal {} ({} records)",
                config.path().display(),
                recovered.valid_records
            );
        }

        Ok(Self {
            writer: Mutex::new(Writer {
                file,
                size,
                next_sequence: recovered.max_sequence + 1,
                writes_since_sync: 0,
                closed: false,
            }),
            config,
        })
    }

    /// Returns the journal configuration.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns the journal file path.
    pub fn path(&self) -> PathBuf {
        self.config.path()
    }

    /// Sequence number the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.writer.lock().next_sequence
    }

    /// Number of records written so far.
    pub fn len(&self) -> u64 {
        self.next_sequence() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an entry and returns its sequence number.
    pub fn append(&self, entry: &JournalEntry) -> Result<u64, JournalError> {
        let mut writer = self.writer.lock();
        if writer.closed {
            return Err(JournalError::Closed);
        }

        let sequence = writer.next_sequence;
        let encoded = JournalRecord::from_entry(entry, sequence)?.encode()?;

        let should_sync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => writer.writes_since_sync + 1 >= n,
            FsyncPolicy::Never => false,
        };

        let start = writer.size;
        if let Err(e) = write_at_end(&mut writer.file, &encoded, should_sync) {
            // Drop whatever part of the record made it to the file. If that
            // fails too, the tail is unknown and nothing may follow it.
            if let Err(truncate) = writer.file.set_len(start) {
                writer.closed = true;
                tracing::error!(
                    "journal {} poisoned: rollback to offset {} failed: {}",
                    self.config.path().display(),
                    start,
                    truncate
                );
            }
            return Err(e.into());
        }

        writer.size += encoded.len() as u64;
        writer.next_sequence += 1;
        writer.writes_since_sync = if should_sync {
            0
        } else {
            writer.writes_since_sync + 1
        };

        Ok(sequence)
    }

    /// Reads all entries in sequence order.
    pub fn read_all(&self) -> Result<Vec<(u64, JournalEntry)>, JournalError> {
        // Hold the writer lock so a concurrent append cannot be half-read.
        let _writer = self.writer.lock();
        read_entries(&self.config.path())
    }

    /// Syncs the journal to disk.
    pub fn sync(&self) -> Result<(), JournalError> {
        let mut writer = self.writer.lock();
        writer.file.sync_data()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Syncs and closes the journal. Further appends fail with `Closed`.
    pub fn close(&self) -> Result<(), JournalError> {
        let mut writer = self.writer.lock();
        if !writer.closed {
            writer.file.sync_all()?;
            writer.closed = true;
        }
        Ok(())
    }
}

fn write_at_end(file: &mut File, bytes: &[u8], sync: bool) -> std::io::Result<()> {
    file.seek(SeekFrom::End(0))?;
    file.write_all(bytes)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

fn read_entries(path: &Path) -> Result<Vec<(u64, JournalEntry)>, JournalError> {
    let (records, _, _) = read_records(path)?;
    records
        .into_iter()
        .map(|record| Ok((record.header.sequence, record.entry()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn grant(n: u8) -> JournalEntry {
        JournalEntry::GrantRole {
            role: format!("0x{:02x}", n),
            account: "0xbb".to_string(),
            sender: "0xaa".to_string(),
        }
    }

    fn open(dir: &TempDir) -> Journal {
        Journal::open(JournalConfig::new(dir.path()).with_fsync_policy(FsyncPolicy::Never))
            .unwrap()
    }

    #[test]
    fn test_append_assigns_sequences() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        assert!(journal.is_empty());

        assert_eq!(journal.append(&grant(1)).unwrap(), 1);
        assert_eq!(journal.append(&grant(2)).unwrap(), 2);
        assert_eq!(journal.len(), 2);

        let entries = journal.read_all().unwrap();
        assert_eq!(entries, vec![(1, grant(1)), (2, grant(2))]);
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let journal = open(&dir);
            journal.append(&grant(1)).unwrap();
            journal.append(&grant(2)).unwrap();
            journal.close().unwrap();
        }

        let journal = open(&dir);
        assert_eq!(journal.next_sequence(), 3);
        assert_eq!(journal.append(&grant(3)).unwrap(), 3);
        assert_eq!(journal.read_all().unwrap().len(), 3);
    }

    #[test]
    fn test_reopen_drops_torn_tail() {
        let dir = TempDir::new().unwrap();
        {
            let journal = open(&dir);
            journal.append(&grant(1)).unwrap();
        }
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(JOURNAL_FILE))
                .unwrap();
            file.write_all(b"PFSJ\x07").unwrap();
        }

        let journal = open(&dir);
        assert_eq!(journal.append(&grant(2)).unwrap(), 2);
        assert_eq!(
            journal.read_all().unwrap(),
            vec![(1, grant(1)), (2, grant(2))]
        );
    }

    #[test]
    fn test_failed_rollback_poisons_writer() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        journal.append(&grant(1)).unwrap();

        // A read-only handle makes both the write and the truncate fail.
        journal.writer.lock().file = File::open(dir.path().join(JOURNAL_FILE)).unwrap();

        assert!(matches!(journal.append(&grant(2)), Err(JournalError::Io(_))));
        assert!(matches!(journal.append(&grant(3)), Err(JournalError::Closed)));
        assert_eq!(journal.next_sequence(), 2);
        assert_eq!(journal.read_all().unwrap(), vec![(1, grant(1))]);
    }

    #[test]
    fn test_closed_journal_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let journal = open(&dir);
        journal.close().unwrap();
        assert!(matches!(journal.append(&grant(1)), Err(JournalError::Closed)));
    }

    proptest::proptest! {
        #[test]
        fn prop_cut_anywhere_keeps_a_prefix(count in 1u8..8, cut in 0.0f64..1.0) {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(JOURNAL_FILE);
            let written: Vec<_> = {
                let journal = open(&dir);
                (1..=count).map(|n| (journal.append(&grant(n)).unwrap(), grant(n))).collect()
            };

            let size = std::fs::metadata(&path).unwrap().len();
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len((size as f64 * cut) as u64).unwrap();
            drop(file);

            let journal = open(&dir);
            let survived = journal.read_all().unwrap();
            proptest::prop_assert!(survived.len() <= written.len());
            proptest::prop_assert_eq!(&survived[..], &written[..survived.len()]);
            proptest::prop_assert_eq!(journal.next_sequence(), survived.len() as u64 + 1);
        }
    }
}
