//! Journal entry types.
//!
//! Each journal record has the following on-disk format:
//!
//! ```text
//! +----------+----------+----------+----------+----------+----------+
//! | magic    | type     | flags    | reserved | length   | crc32c   |
//! | 4 bytes  | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+----------+
//! | sequence_number     | payload (JSON)                            |
//! | 8 bytes             | length bytes                              |
//! +---------------------+-------------------------------------------+
//! ```
//!
//! Identifiers inside payloads are stored in their display form: the name of
//! a named token, `0x`-prefixed hex for everything else.

use crate::error::JournalError;
use crate::RECORD_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Magic bytes for journal records: "PFSJ"
pub const JOURNAL_MAGIC: [u8; 4] = *b"PFSJ";

/// Maximum record payload size (4 MiB).
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum JournalEntryType {
    Define = 1,
    AddState = 2,
    AddNextState = 3,
    AddAllowedFunction = 4,
    SetPreFunction = 5,
    AddRoleForState = 6,
    GrantRole = 7,
    RevokeRole = 8,
    Transition = 9,
}

impl TryFrom<u8> for JournalEntryType {
    type Error = JournalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JournalEntryType::Define),
            2 => Ok(JournalEntryType::AddState),
            3 => Ok(JournalEntryType::AddNextState),
            4 => Ok(JournalEntryType::AddAllowedFunction),
            5 => Ok(JournalEntryType::SetPreFunction),
            6 => Ok(JournalEntryType::AddRoleForState),
            7 => Ok(JournalEntryType::GrantRole),
            8 => Ok(JournalEntryType::RevokeRole),
            9 => Ok(JournalEntryType::Transition),
            _ => Err(JournalError::InvalidHeader {
                offset: 0,
                reason: format!("unknown entry type: {}", value),
            }),
        }
    }
}

/// A parsed journal record header.
#[derive(Debug, Clone)]
pub struct JournalRecordHeader {
    pub entry_type: JournalEntryType,
    pub flags: u8,
    pub payload_len: u32,
    pub crc32c: u32,
    pub sequence: u64,
}

/// A complete journal record (header + payload).
#[derive(Debug, Clone)]
pub struct JournalRecord {
    pub header: JournalRecordHeader,
    pub payload: Bytes,
}

impl JournalRecord {
    /// Creates a new record.
    pub fn new(entry_type: JournalEntryType, sequence: u64, payload: Bytes) -> Self {
        let crc = crc32c::crc32c(&payload);
        Self {
            header: JournalRecordHeader {
                entry_type,
                flags: 0,
                payload_len: payload.len() as u32,
                crc32c: crc,
                sequence,
            },
            payload,
        }
    }

    /// Builds a record from a typed entry.
    pub fn from_entry(entry: &JournalEntry, sequence: u64) -> Result<Self, JournalError> {
        let payload = serde_json::to_vec(entry)?;
        Ok(Self::new(entry.entry_type(), sequence, Bytes::from(payload)))
    }

    /// Deserializes the payload into a typed entry.
    pub fn entry(&self) -> Result<JournalEntry, JournalError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Encodes the record into bytes.
    pub fn encode(&self) -> Result<BytesMut, JournalError> {
        if self.payload.len() > MAX_RECORD_SIZE {
            return Err(JournalError::RecordTooLarge {
                size: self.payload.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.disk_size());
        buf.put_slice(&JOURNAL_MAGIC);
        buf.put_u8(self.header.entry_type as u8);
        buf.put_u8(self.header.flags);
        buf.put_u16(0);
        buf.put_u32(self.header.payload_len);
        buf.put_u32(self.header.crc32c);
        buf.put_u64(self.header.sequence);
        buf.put_slice(&self.payload);

        Ok(buf)
    }

    /// Decodes a record from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds less than one full record.
    pub fn decode(buf: &mut BytesMut, offset: u64) -> Result<Option<Self>, JournalError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }

        if buf[0..4] != JOURNAL_MAGIC {
            if buf[0..4] == [0, 0, 0, 0] {
                return Ok(None);
            }
            return Err(JournalError::InvalidHeader {
                offset,
                reason: format!("invalid magic: {:?}", &buf[0..4]),
            });
        }

        let entry_type =
            JournalEntryType::try_from(buf[4]).map_err(|_| JournalError::InvalidHeader {
                offset,
                reason: format!("unknown entry type: {}", buf[4]),
            })?;

        let mut header = &buf[5..RECORD_HEADER_SIZE];
        let flags = header.get_u8();
        let _reserved = header.get_u16();
        let payload_len = header.get_u32() as usize;
        let crc_expected = header.get_u32();
        let sequence = header.get_u64();

        if payload_len > MAX_RECORD_SIZE {
            return Err(JournalError::RecordTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }

        if buf.len() < RECORD_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(RECORD_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let crc_actual = crc32c::crc32c(&payload);
        if crc_actual != crc_expected {
            return Err(JournalError::CorruptedRecord {
                offset,
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self {
            header: JournalRecordHeader {
                entry_type,
                flags,
                payload_len: payload_len as u32,
                crc32c: crc_expected,
                sequence,
            },
            payload,
        }))
    }

    /// Returns the total size of this record on disk.
    pub fn disk_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// Typed journal entry. One entry per committed machine mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Machine created from a definition document.
    Define {
        owner: String,
        checksum: String,
        definition: serde_json::Value,
    },
    AddState {
        state: String,
        sender: String,
    },
    AddNextState {
        state: String,
        next_state: String,
        sender: String,
    },
    AddAllowedFunction {
        state: String,
        selector: String,
        sender: String,
    },
    SetPreFunction {
        state: String,
        selector: String,
        sender: String,
    },
    AddRoleForState {
        state: String,
        role: String,
        account: String,
        sender: String,
    },
    GrantRole {
        role: String,
        account: String,
        sender: String,
    },
    /// Also written for renounces, where `sender == account`.
    RevokeRole {
        role: String,
        account: String,
        sender: String,
    },
    Transition {
        from_state: String,
        to_state: String,
        actor: String,
        role: String,
        timestamp: u64,
    },
}

impl JournalEntry {
    /// Returns the entry type for this entry.
    pub fn entry_type(&self) -> JournalEntryType {
        match self {
            JournalEntry::Define { .. } => JournalEntryType::Define,
            JournalEntry::AddState { .. } => JournalEntryType::AddState,
            JournalEntry::AddNextState { .. } => JournalEntryType::AddNextState,
            JournalEntry::AddAllowedFunction { .. } => JournalEntryType::AddAllowedFunction,
            JournalEntry::SetPreFunction { .. } => JournalEntryType::SetPreFunction,
            JournalEntry::AddRoleForState { .. } => JournalEntryType::AddRoleForState,
            JournalEntry::GrantRole { .. } => JournalEntryType::GrantRole,
            JournalEntry::RevokeRole { .. } => JournalEntryType::RevokeRole,
            JournalEntry::Transition { .. } => JournalEntryType::Transition,
        }
    }

    /// Returns the account that caused this entry, if any.
    pub fn sender(&self) -> Option<&str> {
        match self {
            JournalEntry::Define { owner, .. } => Some(owner),
            JournalEntry::AddState { sender, .. }
            | JournalEntry::AddNextState { sender, .. }
            | JournalEntry::AddAllowedFunction { sender, .. }
            | JournalEntry::SetPreFunction { sender, .. }
            | JournalEntry::AddRoleForState { sender, .. }
            | JournalEntry::GrantRole { sender, .. }
            | JournalEntry::RevokeRole { sender, .. } => Some(sender),
            JournalEntry::Transition { actor, .. } => Some(actor),
        }
    }
}
