//! Sibling resolution.
//!
//! Merges every stored representation of one key into a single field map.
//!
//! # Algorithm
//!
//! 1. Parse each sibling into independent ops, a representative timestamp
//!    and timestamp-dependent ops ([`ParsedRecord`])
//! 2. Build one [`Statebox`] per sibling: independent ops first, then the
//!    dependent ones under the representative timestamp
//! 3. Fold every statebox's ops, in sibling order, onto one empty state:
//!    a store replaces the current value only when its timestamp is
//!    strictly greater, a union always accumulates
//!
//! Two stores with equal timestamps keep whichever sibling came first.
//! Without synchronized clocks concurrent writes cannot be fully ordered, so
//! the outcome of an exact tie depends on sibling order.

use crate::{
    operation::{FieldOp, ParsedRecord},
    ModelName, RawRecord, RawValue, ReplicaToken, StoredObject, Timestamp,
};
use std::collections::BTreeMap;

/// Merge accumulator for one or more siblings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Statebox {
    /// Pending operations in application order
    pub ops: Vec<FieldOp>,
    /// Timestamp the dependent operations were applied at
    pub timestamp: Timestamp,
}

impl Statebox {
    /// The statebox rebuilding one stored record.
    pub fn from_record(record: &RawRecord) -> Self {
        let parsed = ParsedRecord::parse(record);
        let timestamp = parsed.timestamp;
        Self {
            ops: parsed.into_ops(),
            timestamp,
        }
    }

    /// Fold several stateboxes into one, preserving encounter order.
    pub fn merge(boxes: impl IntoIterator<Item = Statebox>) -> Self {
        boxes
            .into_iter()
            .fold(Statebox::default(), |mut acc, next| {
                acc.timestamp = acc.timestamp.max(next.timestamp);
                acc.ops.extend(next.ops);
                acc
            })
    }

    /// Replay the pending operations onto an empty state.
    pub fn value(&self) -> BTreeMap<String, RawValue> {
        let mut state: BTreeMap<String, (RawValue, Timestamp)> = BTreeMap::new();
        for op in &self.ops {
            apply(&mut state, op);
        }
        state.into_iter().map(|(k, (v, _))| (k, v)).collect()
    }
}

fn apply(state: &mut BTreeMap<String, (RawValue, Timestamp)>, op: &FieldOp) {
    match op {
        FieldOp::Store {
            key,
            value,
            timestamp,
        } => match state.get(key) {
            Some((_, current)) if *timestamp <= *current => {}
            _ => {
                state.insert(key.clone(), (value.clone(), *timestamp));
            }
        },
        FieldOp::Union { key, members } => {
            let slot = state
                .entry(key.clone())
                .or_insert_with(|| (RawValue::Set(Default::default()), 0));
            if let RawValue::Set(existing) = &mut slot.0 {
                existing.extend(members.iter().cloned());
            } else {
                slot.0 = RawValue::Set(members.clone());
            }
        }
    }
}

/// The canonical view of one key after resolving its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Model identity of the first sibling
    pub model: ModelName,
    /// Newest record-level clock among the siblings
    pub clock: Timestamp,
    /// Merged values keyed by storage key
    pub fields: BTreeMap<String, RawValue>,
    /// Token to send with the next write
    pub replica_token: Option<ReplicaToken>,
}

/// Resolve a stored object's siblings. Returns `None` for an object
/// without any sibling.
pub fn resolve(object: &StoredObject) -> Option<Resolved> {
    resolve_siblings(&object.siblings, object.replica_token.clone())
}

/// Resolve a list of siblings with an optional token.
pub fn resolve_siblings(
    siblings: &[RawRecord],
    replica_token: Option<ReplicaToken>,
) -> Option<Resolved> {
    let first = siblings.first()?;

    if siblings.len() > 1 {
        tracing::debug!(
            model = %first.model,
            siblings = siblings.len(),
            "resolving siblings"
        );
        if let Some(other) = siblings.iter().find(|s| s.model != first.model) {
            tracing::warn!(
                expected = %first.model,
                found = %other.model,
                "siblings disagree on model identity"
            );
        }
    }

    let merged = Statebox::merge(siblings.iter().map(Statebox::from_record));

    Some(Resolved {
        model: first.model.clone(),
        clock: siblings.iter().map(|s| s.clock).max().unwrap_or_default(),
        fields: merged.value(),
        replica_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(text: &str) -> RawValue {
        let mut bytes = vec![crate::codec::TAG_STRING];
        bytes.extend_from_slice(text.as_bytes());
        RawValue::Register(bytes)
    }

    fn set(items: &[&str]) -> RawValue {
        RawValue::Set(
            items
                .iter()
                .map(|i| {
                    let mut bytes = vec![crate::codec::TAG_STRING];
                    bytes.extend_from_slice(i.as_bytes());
                    bytes
                })
                .collect(),
        )
    }

    fn sibling(fields: &[(&str, RawValue, Option<Timestamp>)]) -> RawRecord {
        let mut record = RawRecord::new("App.Post", 1);
        for (key, value, ts) in fields {
            record.entries.insert(key.to_string(), value.clone());
            if let Some(ts) = ts {
                record.timestamps.insert(key.to_string(), *ts);
            }
        }
        record
    }

    #[test]
    fn empty_object_resolves_to_none() {
        assert!(resolve(&StoredObject::default()).is_none());
    }

    #[test]
    fn single_sibling_is_reproduced() {
        let record = sibling(&[
            ("title_s", register("A"), Some(10)),
            ("body_s", register("B"), None),
            ("tags_ss", set(&["x", "y"]), None),
        ]);
        let resolved = resolve(&StoredObject::single(record.clone())).unwrap();
        assert_eq!(resolved.fields, record.entries);
        assert_eq!(resolved.model, "App.Post");
    }

    #[test]
    fn timestamped_store_beats_untimestamped() {
        let a = sibling(&[("count_s", register("7"), Some(500))]);
        let b = sibling(&[("count_s", register("3"), None)]);

        for order in [vec![a.clone(), b.clone()], vec![b, a]] {
            let resolved = resolve_siblings(&order, None).unwrap();
            assert_eq!(resolved.fields["count_s"], register("7"));
        }
    }

    #[test]
    fn newer_timestamp_wins() {
        let older = sibling(&[("title_s", register("old"), Some(100))]);
        let newer = sibling(&[("title_s", register("new"), Some(200))]);
        let resolved = resolve_siblings(&[newer, older], None).unwrap();
        assert_eq!(resolved.fields["title_s"], register("new"));
    }

    #[test]
    fn representative_timestamp_applies_to_all_dependent_fields() {
        // Sibling a stamped `title` at 100 but its newest field is at 300, so
        // its `title` is applied at 300 and beats b's 200.
        let a = sibling(&[
            ("title_s", register("a"), Some(100)),
            ("body_s", register("a"), Some(300)),
        ]);
        let b = sibling(&[("title_s", register("b"), Some(200))]);
        let resolved = resolve_siblings(&[b, a], None).unwrap();
        assert_eq!(resolved.fields["title_s"], register("a"));
    }

    #[test]
    fn equal_timestamps_keep_first_encountered() {
        let a = sibling(&[("title_s", register("a"), Some(100))]);
        let b = sibling(&[("title_s", register("b"), Some(100))]);
        let resolved = resolve_siblings(&[a.clone(), b.clone()], None).unwrap();
        assert_eq!(resolved.fields["title_s"], register("a"));
        let resolved = resolve_siblings(&[b, a], None).unwrap();
        assert_eq!(resolved.fields["title_s"], register("b"));
    }

    #[test]
    fn sets_union_across_siblings() {
        let a = sibling(&[("tags_ss", set(&["x"]), None)]);
        let b = sibling(&[("tags_ss", set(&["y"]), None)]);
        let resolved = resolve_siblings(&[a, b], None).unwrap();
        assert_eq!(resolved.fields["tags_ss"], set(&["x", "y"]));
    }

    #[test]
    fn fields_present_in_one_sibling_survive() {
        let a = sibling(&[("title_s", register("a"), Some(5))]);
        let b = sibling(&[("body_s", register("b"), None)]);
        let resolved = resolve_siblings(&[a, b], None).unwrap();
        assert_eq!(resolved.fields.len(), 2);
    }

    #[test]
    fn token_and_clock_are_carried() {
        let mut a = sibling(&[]);
        a.clock = 3;
        let mut b = sibling(&[]);
        b.clock = 8;
        let token = ReplicaToken::new(vec![9]);
        let object = StoredObject::new(vec![a, b], Some(token.clone()));
        let resolved = resolve(&object).unwrap();
        assert_eq!(resolved.clock, 8);
        assert_eq!(resolved.replica_token, Some(token));
    }

    #[test]
    fn merge_is_idempotent_for_repeated_sibling() {
        let a = sibling(&[
            ("title_s", register("a"), Some(5)),
            ("tags_ss", set(&["x"]), None),
        ]);
        let once = resolve_siblings(std::slice::from_ref(&a), None).unwrap();
        let twice = resolve_siblings(&[a.clone(), a], None).unwrap();
        assert_eq!(once.fields, twice.fields);
    }
}
