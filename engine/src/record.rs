//! Stored representation of records.
//!
//! A [`RawRecord`] is what actually lives in the key/value store: a flat map
//! from search-suffixed storage keys to encoded registers or sets, plus the
//! model identity, a top-level logical clock and the per-field timestamps
//! that conflict resolution arbitrates on.
//!
//! # Wire format
//!
//! ```text
//! {
//!   "_model": "App.Post",
//!   "_clock": 1706745600123,
//!   "title_s": "BUhlbGxv",                  // base64 register
//!   "tags_ss": ["BXJ1c3Q=", "BWRi"],         // base64 registers of a set
//!   "__ts__title_s": 1706745600123           // field timestamp
//! }
//! ```

use crate::{error::Result, Error, ModelName, Timestamp};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// JSON key holding the model identity.
pub const MODEL_KEY: &str = "_model";
/// JSON key holding the record-level logical clock.
pub const CLOCK_KEY: &str = "_clock";
/// Prefix of the JSON keys holding per-field timestamps.
pub const TIMESTAMP_PREFIX: &str = "__ts__";

/// Opaque causal-history token handed out by the store (a vector clock in
/// practice). Carried from a read to the next write, never interpreted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReplicaToken(pub Vec<u8>);

impl ReplicaToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ReplicaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaToken({})", BASE64.encode(&self.0))
    }
}

impl Serialize for ReplicaToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ReplicaToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text)
            .map(ReplicaToken)
            .map_err(serde::de::Error::custom)
    }
}

/// An encoded field value as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// Single-value register (tag byte + payload)
    Register(Vec<u8>),
    /// Add-wins set of independently encoded registers
    Set(BTreeSet<Vec<u8>>),
}

impl RawValue {
    fn to_json(&self) -> serde_json::Value {
        match self {
            RawValue::Register(bytes) => serde_json::Value::String(BASE64.encode(bytes)),
            RawValue::Set(members) => serde_json::Value::Array(
                members
                    .iter()
                    .map(|m| serde_json::Value::String(BASE64.encode(m)))
                    .collect(),
            ),
        }
    }

    fn from_json(key: &str, value: &serde_json::Value) -> Result<Self> {
        let decode = |text: &str| {
            BASE64
                .decode(text)
                .map_err(|e| Error::MalformedRecord(format!("field '{}': {}", key, e)))
        };

        match value {
            serde_json::Value::String(text) => Ok(RawValue::Register(decode(text)?)),
            serde_json::Value::Array(items) => {
                let mut members = BTreeSet::new();
                for item in items {
                    let text = item.as_str().ok_or_else(|| {
                        Error::MalformedRecord(format!("field '{}': set member is not a string", key))
                    })?;
                    members.insert(decode(text)?);
                }
                Ok(RawValue::Set(members))
            }
            other => Err(Error::MalformedRecord(format!(
                "field '{}': unexpected JSON value {}",
                key, other
            ))),
        }
    }
}

/// One stored representation of a record (a single sibling).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    /// Model identity
    pub model: ModelName,
    /// Logical clock of the write that produced this representation
    pub clock: Timestamp,
    /// Encoded values keyed by storage key
    pub entries: BTreeMap<String, RawValue>,
    /// Field timestamps keyed by storage key
    pub timestamps: BTreeMap<String, Timestamp>,
}

impl RawRecord {
    /// Create an empty record for a model.
    pub fn new(model: impl Into<ModelName>, clock: Timestamp) -> Self {
        Self {
            model: model.into(),
            clock,
            entries: BTreeMap::new(),
            timestamps: BTreeMap::new(),
        }
    }

    /// Render the record as its JSON wire object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(MODEL_KEY.into(), self.model.clone().into());
        map.insert(CLOCK_KEY.into(), self.clock.into());
        for (key, value) in &self.entries {
            map.insert(key.clone(), value.to_json());
        }
        for (key, ts) in &self.timestamps {
            map.insert(format!("{}{}", TIMESTAMP_PREFIX, key), (*ts).into());
        }
        serde_json::Value::Object(map)
    }

    /// Parse a JSON wire object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::MalformedRecord("record must be a JSON object".into()))?;
        Self::from_map(object)
    }

    /// Parse a flat JSON map (a stored object body or a filtered search hit).
    pub fn from_map(object: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut record = RawRecord::default();

        for (key, value) in object {
            if key == MODEL_KEY {
                record.model = value
                    .as_str()
                    .ok_or_else(|| Error::MalformedRecord("model key must be a string".into()))?
                    .to_string();
            } else if key == CLOCK_KEY {
                record.clock = value
                    .as_u64()
                    .ok_or_else(|| Error::MalformedRecord("clock must be an integer".into()))?;
            } else if let Some(field) = key.strip_prefix(TIMESTAMP_PREFIX) {
                let ts = value.as_u64().ok_or_else(|| {
                    Error::MalformedRecord(format!("timestamp of '{}' must be an integer", field))
                })?;
                record.timestamps.insert(field.to_string(), ts);
            } else {
                record
                    .entries
                    .insert(key.clone(), RawValue::from_json(key, value)?);
            }
        }

        if record.model.is_empty() {
            return Err(Error::MalformedRecord("missing model key".into()));
        }

        Ok(record)
    }

    /// Serialize to the bytes handed to the store.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    /// Parse bytes read from the store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedRecord(e.to_string()))?;
        Self::from_json(&value)
    }
}

/// Everything the store returns for one key: every sibling plus the
/// replica token of the object as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredObject {
    pub siblings: Vec<RawRecord>,
    pub replica_token: Option<ReplicaToken>,
}

impl StoredObject {
    pub fn new(siblings: Vec<RawRecord>, replica_token: Option<ReplicaToken>) -> Self {
        Self {
            siblings,
            replica_token,
        }
    }

    /// An object with a single representation and no token.
    pub fn single(record: RawRecord) -> Self {
        Self::new(vec![record], None)
    }

    pub fn has_siblings(&self) -> bool {
        self.siblings.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> RawRecord {
        let mut record = RawRecord::new("App.Post", 42);
        record
            .entries
            .insert("title_s".into(), RawValue::Register(b"\x05Hello".to_vec()));
        record.entries.insert(
            "tags_ss".into(),
            RawValue::Set([b"\x05a".to_vec(), b"\x05b".to_vec()].into_iter().collect()),
        );
        record.timestamps.insert("title_s".into(), 42);
        record
    }

    #[test]
    fn wire_layout() {
        let json = sample().to_json();
        assert_eq!(json["_model"], "App.Post");
        assert_eq!(json["_clock"], 42);
        assert_eq!(json["title_s"], BASE64.encode(b"\x05Hello"));
        assert_eq!(json["tags_ss"].as_array().unwrap().len(), 2);
        assert_eq!(json["__ts__title_s"], 42);
    }

    #[test]
    fn bytes_roundtrip() {
        let record = sample();
        let parsed = RawRecord::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn missing_model_is_rejected() {
        let result = RawRecord::from_json(&json!({"_clock": 1}));
        assert!(matches!(result, Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn bad_base64_is_rejected() {
        let result = RawRecord::from_json(&json!({"_model": "M", "title_s": "!!!"}));
        assert!(matches!(result, Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn replica_token_serializes_as_base64() {
        let token = ReplicaToken::new(vec![1, 2, 3]);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"AQID\"");
        let parsed: ReplicaToken = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, token);
    }
}
