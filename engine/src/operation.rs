//! Field operations derived from stored records.
//!
//! Conflict resolution never merges records directly. Each sibling is first
//! turned into a list of operations that, replayed onto an empty state,
//! reproduce it. Replaying the operations of every sibling onto one state is
//! the merge.

use crate::{clock::BASELINE_TIMESTAMP, RawRecord, RawValue, Timestamp};
use std::collections::BTreeSet;

/// Timestamp of store operations whose field carried no timestamp. Any
/// timestamped write beats them.
pub const UNTIMED: Timestamp = 0;

/// A pending field operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    /// Last-writer-wins store of a register
    Store {
        key: String,
        value: RawValue,
        timestamp: Timestamp,
    },
    /// Add-wins union into a set
    Union {
        key: String,
        members: BTreeSet<Vec<u8>>,
    },
}

impl FieldOp {
    pub fn key(&self) -> &str {
        match self {
            FieldOp::Store { key, .. } => key,
            FieldOp::Union { key, .. } => key,
        }
    }
}

/// A stored record split into the operations that rebuild it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    /// Unions and untimestamped stores, in encounter order
    pub independent: Vec<FieldOp>,
    /// Representative timestamp: the newest field timestamp in the record
    pub timestamp: Timestamp,
    /// Stores whose field carried a timestamp
    pub dependent: Vec<FieldOp>,
}

impl ParsedRecord {
    /// Classify every entry of a stored record.
    ///
    /// Sets become unions. Registers become stores; a store depends on the
    /// timestamp when the record has a companion timestamp for its key.
    pub fn parse(record: &RawRecord) -> Self {
        let timestamp = record
            .timestamps
            .values()
            .copied()
            .max()
            .unwrap_or(BASELINE_TIMESTAMP);

        let mut independent = Vec::new();
        let mut timed_keys = Vec::new();

        for (key, value) in &record.entries {
            match value {
                RawValue::Set(members) => independent.push(FieldOp::Union {
                    key: key.clone(),
                    members: members.clone(),
                }),
                RawValue::Register(_) if record.timestamps.contains_key(key) => {
                    timed_keys.push((key, value));
                }
                RawValue::Register(_) => independent.push(FieldOp::Store {
                    key: key.clone(),
                    value: value.clone(),
                    timestamp: UNTIMED,
                }),
            }
        }

        let dependent = timed_keys
            .into_iter()
            .map(|(key, value)| FieldOp::Store {
                key: key.clone(),
                value: value.clone(),
                timestamp,
            })
            .collect();

        Self {
            independent,
            timestamp,
            dependent,
        }
    }

    /// All operations, independent ones first.
    pub fn into_ops(self) -> Vec<FieldOp> {
        let mut ops = self.independent;
        ops.extend(self.dependent);
        ops
    }
}
