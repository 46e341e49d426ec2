//! In-process store with sibling semantics and a search index.

use super::search::{compare_documents, parse_sort, Document, SearchExpr};
use super::{KvStore, PutOptions, SearchHit, StoreError, StoreObject};
use async_trait::async_trait;
use cairn_engine::{
    query::{SearchOptions, BUCKET_FIELD, DOC_ID_FIELD, KEY_FIELD, SCORE_FIELD},
    RawRecord, ReplicaToken,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Store held in memory.
///
/// Every write issues a fresh token. A write carrying the current token
/// replaces every sibling; any other write is concurrent and is kept next to
/// the existing siblings. Each sibling is indexed for search.
pub struct MemoryStore {
    objects: DashMap<(String, String), Slot>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    searches: AtomicUsize,
    unavailable: AtomicBool,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Slot {
    siblings: Vec<Sibling>,
    token: Option<ReplicaToken>,
}

#[derive(Debug)]
struct Sibling {
    body: Vec<u8>,
    doc_id: String,
}

/// Requests served so far, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub puts: usize,
    pub deletes: usize,
    pub searches: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.gets + self.puts + self.deletes + self.searches
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Delay every request by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every request fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
        }
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sibling count of a key, 0 when absent.
    #[must_use]
    pub fn sibling_count(&self, bucket: &str, key: &str) -> usize {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|slot| slot.siblings.len())
            .unwrap_or(0)
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn snapshot(slot: &Slot) -> StoreObject {
        StoreObject {
            siblings: slot.siblings.iter().map(|s| s.body.clone()).collect(),
            token: slot.token.clone(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoreObject>, StoreError> {
        self.enter(&self.gets).await?;
        Ok(self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|slot| Self::snapshot(&slot)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: PutOptions,
    ) -> Result<Option<StoreObject>, StoreError> {
        self.enter(&self.puts).await?;

        let mut slot = self
            .objects
            .entry((bucket.to_string(), key.to_string()))
            .or_default();

        let descends = slot.siblings.is_empty() || options.token == slot.token;
        let sibling = Sibling {
            body,
            doc_id: Uuid::new_v4().to_string(),
        };
        if descends {
            slot.siblings = vec![sibling];
        } else {
            tracing::debug!(bucket, key, siblings = slot.siblings.len() + 1, "concurrent write kept as sibling");
            slot.siblings.push(sibling);
        }
        slot.token = Some(ReplicaToken::new(Uuid::new_v4().as_bytes().to_vec()));

        Ok(options.return_body.then(|| Self::snapshot(&slot)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.enter(&self.deletes).await?;
        self.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.enter(&self.searches).await?;

        let query_expr = SearchExpr::parse(query)?;
        let filter = options
            .filter
            .as_deref()
            .map(SearchExpr::parse)
            .transpose()?;
        let sort = options
            .sort
            .as_deref()
            .map(parse_sort)
            .transpose()?
            .unwrap_or_default();

        let mut matched = Vec::new();
        for item in self.objects.iter() {
            let (bucket, key) = item.key();
            for (position, sibling) in item.value().siblings.iter().enumerate() {
                let record = match RawRecord::from_bytes(&sibling.body) {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(%bucket, %key, error = %err, "skipping unindexable sibling");
                        continue;
                    }
                };
                let doc = Document::new(bucket, key, &record);
                if !query_expr.matches(&doc) || !filter.as_ref().map_or(true, |f| f.matches(&doc)) {
                    continue;
                }
                let serde_json::Value::Object(mut hit) = record.to_json() else {
                    continue;
                };
                hit.insert(BUCKET_FIELD.into(), bucket.clone().into());
                hit.insert(KEY_FIELD.into(), key.clone().into());
                hit.insert(DOC_ID_FIELD.into(), sibling.doc_id.clone().into());
                hit.insert(SCORE_FIELD.into(), serde_json::Value::from(1.0_f64));
                matched.push(((bucket.clone(), key.clone(), position), doc, hit));
            }
        }

        matched.sort_by(|a, b| compare_documents(&a.1, &b.1, &sort).then_with(|| a.0.cmp(&b.0)));

        let hits: Vec<SearchHit> = matched
            .into_iter()
            .skip(options.start.unwrap_or(0))
            .take(options.rows.unwrap_or(usize::MAX))
            .map(|(_, _, hit)| hit)
            .collect();

        tracing::debug!(index, query, hits = hits.len(), "search served");
        Ok(hits)
    }
}
