//! Entities and their stored form.
//!
//! An [`Entity`] is a typed record of one declared model. Marshaling to a
//! [`RawRecord`] stamps only the fields whose content changed since the
//! entity was read, which is what keeps untouched fields from winning
//! last-writer-wins arbitration against concurrent writers.

use crate::{
    clock::LogicalClock,
    codec,
    error::Result,
    reconcile::Resolved,
    schema::{ID_FIELD, VERSION_FIELD},
    Error, FieldName, FieldType, ModelName, ModelSchema, RawRecord, ReplicaToken, ScalarType,
    Schema, SchemaVersion, Value,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 of a value's canonical binary form.
pub type ContentHash = [u8; 32];

/// Random bytes behind a generated primary key (24 base64 characters).
const KEY_BYTES: usize = 18;

/// Per-field content hashes captured when an entity is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CausalContext {
    hashes: BTreeMap<FieldName, ContentHash>,
}

impl CausalContext {
    /// An empty context: every field counts as changed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current values of an entity, including key and version.
    pub fn capture(entity: &Entity) -> Self {
        let mut hashes = BTreeMap::new();
        for (field, value) in entity.values() {
            hashes.insert(field, content_hash(&value));
        }
        Self { hashes }
    }

    pub fn get(&self, field: &str) -> Option<&ContentHash> {
        self.hashes.get(field)
    }

    /// Whether `value` is what the field held when the context was captured.
    pub fn is_unchanged(&self, field: &str, value: &Value) -> bool {
        self.hashes
            .get(field)
            .is_some_and(|hash| *hash == content_hash(value))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// A record of a declared model.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Model this entity belongs to
    pub model: ModelName,
    /// Primary key, generated on insert when absent
    pub id: Option<String>,
    /// Schema version the field values conform to
    pub version: Option<SchemaVersion>,
    /// Declared field values; absent fields are null
    pub fields: BTreeMap<FieldName, Value>,
    /// Content hashes from the last read, never persisted
    pub context: Option<CausalContext>,
    /// Store token from the last read, passed back on the next write
    pub replica_token: Option<ReplicaToken>,
}

impl Entity {
    /// A fresh entity at the model's current version.
    pub fn new(schema: &ModelSchema) -> Self {
        Self {
            model: schema.name.clone(),
            id: None,
            version: Some(schema.version),
            fields: BTreeMap::new(),
            context: Some(CausalContext::new()),
            replica_token: None,
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<FieldName>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set(&mut self, field: impl Into<FieldName>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Value of any field, including the implicit key and version.
    pub fn value(&self, field: &str) -> Option<Value> {
        match field {
            ID_FIELD => self.id.clone().map(Value::String),
            VERSION_FIELD => self.version.map(|v| Value::Integer(v.into())),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Every non-null value, implicit fields first.
    fn values(&self) -> impl Iterator<Item = (FieldName, Value)> + '_ {
        let id = self
            .id
            .clone()
            .map(|id| (ID_FIELD.to_string(), Value::String(id)));
        let version = self
            .version
            .map(|v| (VERSION_FIELD.to_string(), Value::Integer(v.into())));
        id.into_iter()
            .chain(version)
            .chain(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Generate a primary key if the entity has none. Returns the key.
    pub fn ensure_key(&mut self) -> &str {
        match self.id {
            Some(ref id) if !id.is_empty() => {}
            _ => self.id = Some(generate_key()),
        }
        self.id.as_deref().unwrap_or_default()
    }
}

/// Generate a globally unique primary key.
///
/// Random bytes, base64-encoded, with `/` and `+` replaced so the key is a
/// single token for the search index's tokenizer.
pub fn generate_key() -> String {
    let bytes: [u8; KEY_BYTES] = rand::random();
    BASE64
        .encode(bytes)
        .chars()
        .map(|c| match c {
            '/' => '_',
            '+' => '-',
            other => other,
        })
        .collect()
}

/// Hash a value's canonical binary form.
pub fn content_hash(value: &Value) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(value));
    hasher.finalize().into()
}

fn canonical_bytes(value: &Value) -> Vec<u8> {
    let scalar = match value {
        Value::Integer(_) => ScalarType::Integer,
        Value::Float(_) => ScalarType::Float,
        Value::Boolean(_) => ScalarType::Boolean,
        Value::String(_) => ScalarType::String,
        Value::Binary(_) => ScalarType::Binary,
        Value::DateTime(_) => ScalarType::DateTime,
        Value::Interval(_) => ScalarType::Interval,
        Value::List(items) => {
            let mut out = vec![0x80];
            for item in items {
                let bytes = canonical_bytes(item);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(&bytes);
            }
            return out;
        }
    };
    // A value always encodes under its own type.
    codec::encode("", value, scalar).unwrap_or_default()
}

/// Marshal an entity into the record written to the store.
///
/// Fails when the entity lacks a primary key, a schema version or a causal
/// context, or holds a field the model does not declare.
pub fn to_stored(entity: &Entity, schema: &ModelSchema, clock: &LogicalClock) -> Result<RawRecord> {
    let id = entity
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::MissingPrimaryKey(entity.model.clone()))?;
    let version = entity
        .version
        .ok_or_else(|| Error::MissingVersion(entity.model.clone()))?;
    let context = entity
        .context
        .as_ref()
        .ok_or_else(|| Error::MissingContext(entity.model.clone()))?;

    if let Some(field) = entity.fields.keys().find(|f| schema.field(f).is_none()) {
        return Err(Error::UnknownField {
            model: schema.name.clone(),
            field: field.clone(),
        });
    }

    let now = clock.tick();
    let mut record = RawRecord::new(schema.name.clone(), now);

    put_field(
        &mut record,
        context,
        ID_FIELD,
        FieldType::String,
        &Value::String(id.to_string()),
    )?;
    put_field(
        &mut record,
        context,
        VERSION_FIELD,
        FieldType::Integer,
        &Value::Integer(version.into()),
    )?;
    for def in &schema.fields {
        if let Some(value) = entity.fields.get(&def.name) {
            put_field(&mut record, context, &def.name, def.field_type, value)?;
        }
    }

    Ok(record)
}

fn put_field(
    record: &mut RawRecord,
    context: &CausalContext,
    field: &str,
    field_type: FieldType,
    value: &Value,
) -> Result<()> {
    let key = codec::storage_key(field, field_type);
    let raw = codec::encode_field(field, value, field_type)?;
    if !field_type.is_list() && !context.is_unchanged(field, value) {
        record.timestamps.insert(key.clone(), record.clock);
    }
    record.entries.insert(key, raw);
    Ok(())
}

/// Build an entity from a resolved field map.
///
/// Fields that are missing, fail to decode, or decode to a value of the
/// wrong type are left null.
pub fn from_merged(resolved: &Resolved, schema: &Schema) -> Result<Entity> {
    let model = schema.require_model(&resolved.model)?;

    let decode = |field: &str, field_type: FieldType| -> Option<Value> {
        let key = codec::storage_key(field, field_type);
        let raw = resolved.fields.get(&key)?;
        let decoded = codec::decode_field(raw);
        if decoded.is_none() {
            tracing::warn!(model = %model.name, field, "dropping undecodable field");
        }
        decoded
    };

    let id = match decode(ID_FIELD, FieldType::String) {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };
    let version = match decode(VERSION_FIELD, FieldType::Integer) {
        Some(Value::Integer(v)) => SchemaVersion::try_from(v).ok(),
        _ => None,
    };

    let mut fields = BTreeMap::new();
    for def in &model.fields {
        let Some(value) = decode(&def.name, def.field_type) else {
            continue;
        };
        if def.validate(&value).is_err() {
            tracing::warn!(
                model = %model.name,
                field = %def.name,
                found = value.type_name(),
                "dropping field of unexpected type"
            );
            continue;
        }
        fields.insert(def.name.clone(), value);
    }

    let mut entity = Entity {
        model: model.name.clone(),
        id,
        version: Some(version.unwrap_or(0)),
        fields,
        context: None,
        replica_token: resolved.replica_token.clone(),
    };
    entity.context = Some(CausalContext::capture(&entity));
    Ok(entity)
}
