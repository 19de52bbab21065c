//! Append-only transition history.

use crate::error::CoreError;
use crate::ids::{Account, RoleId, StateId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Record of one committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_state: StateId,
    pub to_state: StateId,
    /// Account that triggered the transition.
    pub actor: Account,
    /// Role the actor transitioned under.
    pub role: RoleId,
    /// Commit time, Unix seconds unless a custom clock is installed.
    pub timestamp: u64,
}

/// Ordered, append-only sequence of transition records.
///
/// Index order is commit order. Records are never reordered or removed.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    records: Vec<TransitionRecord>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record at `index`.
    pub fn at(&self, index: u64) -> Result<&TransitionRecord, CoreError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
            .ok_or(CoreError::OutOfRange {
                index,
                length: self.len(),
            })
    }

    pub fn last(&self) -> Option<&TransitionRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransitionRecord> {
        self.records.iter()
    }

    /// States visited, starting with the source of the first transition.
    pub fn path(&self) -> Vec<StateId> {
        let mut path = Vec::with_capacity(self.records.len() + 1);
        if let Some(first) = self.records.first() {
            path.push(first.from_state);
        }
        path.extend(self.records.iter().map(|r| r.to_state));
        path
    }

    /// Appends a record and returns its index. Only the commit path calls this.
    pub(crate) fn append(&mut self, record: TransitionRecord) -> u64 {
        self.records.push(record);
        self.len() - 1
    }
}

impl<'a> IntoIterator for &'a HistoryLog {
    type Item = &'a TransitionRecord;
    type IntoIter = std::slice::Iter<'a, TransitionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock, Unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, by: u64) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
