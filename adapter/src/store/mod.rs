//! Store boundary.
//!
//! The adapter talks to the key-value and search store only through
//! [`KvStore`]. Objects cross the boundary as raw sibling bodies and search
//! hits as flat JSON maps; decoding them into engine records happens here.

mod memory;
mod search;

pub use memory::{CallCounts, MemoryStore};

use async_trait::async_trait;
use cairn_engine::{
    query::{SearchOptions, BUCKET_FIELD, DOC_ID_FIELD, KEY_FIELD, SCORE_FIELD},
    RawRecord, ReplicaToken, StoredObject,
};
use thiserror::Error;

/// One search hit: the stored fields of a sibling plus index metadata.
pub type SearchHit = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store request timed out")]
    Timeout,
    #[error("Invalid search query: {0}")]
    BadQuery(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the failure is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout)
    }
}

/// Every representation the store holds for one key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreObject {
    /// Sibling bodies in the order the store returned them
    pub siblings: Vec<Vec<u8>>,
    /// Opaque causality token of the object
    pub token: Option<ReplicaToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PutOptions {
    /// Token from the read the write is based on
    pub token: Option<ReplicaToken>,
    /// Return every sibling after the write
    pub return_body: bool,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoreObject>, StoreError>;

    /// Write one representation. A write without the current token is
    /// concurrent with whatever the store holds and becomes a sibling.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: PutOptions,
    ) -> Result<Option<StoreObject>, StoreError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    async fn search(
        &self,
        index: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, StoreError>;
}

/// Decode the siblings of a fetched object.
pub fn decode_object(object: StoreObject) -> cairn_engine::Result<StoredObject> {
    let siblings = object
        .siblings
        .iter()
        .map(|body| RawRecord::from_bytes(body))
        .collect::<cairn_engine::Result<Vec<_>>>()?;
    Ok(StoredObject::new(siblings, object.token))
}

/// Group search hits into one object per key, in first-hit order.
///
/// Hits carry no token, so the objects are read-only views.
pub fn decode_hits(hits: Vec<SearchHit>) -> cairn_engine::Result<Vec<StoredObject>> {
    let mut objects: Vec<(String, StoredObject)> = Vec::new();

    for mut hit in hits {
        let key = match hit.remove(KEY_FIELD) {
            Some(serde_json::Value::String(key)) => key,
            _ => {
                return Err(cairn_engine::Error::MalformedRecord(
                    "search hit without a key".into(),
                ))
            }
        };
        for meta in [BUCKET_FIELD, DOC_ID_FIELD, SCORE_FIELD] {
            hit.remove(meta);
        }
        let record = RawRecord::from_map(&hit)?;

        match objects.iter_mut().find(|(k, _)| *k == key) {
            Some((_, object)) => object.siblings.push(record),
            None => objects.push((key, StoredObject::single(record))),
        }
    }

    Ok(objects.into_iter().map(|(_, object)| object).collect())
}
