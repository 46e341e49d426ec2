//! # Cairn Adapter
//!
//! Async CRUD and query facade over an eventually consistent key/value
//! store with a search index.
//!
//! The store itself sits behind the [`KvStore`] trait. [`MemoryStore`] is an
//! in-process implementation with the same sibling and search behavior,
//! used by the test suite and for local development.
//!
//! ```rust
//! use cairn_adapter::{Adapter, AdapterConfig, MemoryStore};
//! use cairn_engine::{Entity, FieldDef, FieldType, ModelSchema, Schema};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cairn_adapter::Result<()> {
//! let post = ModelSchema::new("App.Post", "posts", 1, vec![FieldDef::new("title", FieldType::String)]);
//! let adapter = Adapter::new(
//!     MemoryStore::new(),
//!     Schema::new().with_model(post.clone()),
//!     AdapterConfig::default(),
//! );
//!
//! let saved = adapter.insert(Entity::new(&post).with("title", "Hello")).await?;
//! let key = saved.id.clone().unwrap_or_default();
//! let loaded = adapter.get("App.Post", &key).await?;
//! assert_eq!(loaded.map(|e| e.fields), Some(saved.fields));
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod store;

pub use adapter::{Adapter, Change};
pub use config::{AdapterConfig, ConfigError};
pub use error::{AdapterError, Result};
pub use store::{
    decode_hits, decode_object, CallCounts, KvStore, MemoryStore, PutOptions, SearchHit,
    StoreError, StoreObject,
};
