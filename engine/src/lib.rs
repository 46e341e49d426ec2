//! # Cairn Engine
//!
//! The storage core of an adapter that maps typed entities onto an
//! eventually consistent key/value store with a search index.
//!
//! This crate holds every piece of logic that does not touch the network:
//! encoding, conflict resolution, entity marshaling, lazy migration and
//! query compilation. The async adapter built on top of it only moves bytes.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never talks to the store itself
//! - **Mergeable writes**: every stored record can be merged with its
//!   concurrent siblings without coordination
//! - **Typed failures**: precondition violations, migration path errors and
//!   unsupported queries are distinct error variants
//!
//! ## Core Concepts
//!
//! ### Registers and sets
//!
//! Scalar fields are stored as registers: a type tag byte plus a payload.
//! List fields are stored as sets of registers. See [`codec`].
//!
//! ### Siblings and the statebox
//!
//! Concurrent writes to one key leave several representations, siblings,
//! in the store. [`reconcile::resolve`] replays each sibling as field
//! operations and folds them: registers are last-writer-wins on the field
//! timestamp, sets are unioned.
//!
//! ### Causal context
//!
//! Entities remember a content hash per field from the moment they were
//! read. On the next write only fields whose hash changed get a fresh
//! timestamp, so untouched fields never override a concurrent writer.
//!
//! ### Migrations
//!
//! Each stored record carries its schema version. The [`Migrator`] walks
//! it forward or backward to the target version of its lineage when it is
//! read, one registered [`Migration`] at a time.
//!
//! ### Queries
//!
//! [`query::compile`] lowers a [`Query`] into an index query string and a
//! client-side [`PostProcess`] pipeline for grouping, group filters,
//! projections and type-aware ordering.
//!
//! ## Quick Start
//!
//! ```rust
//! use cairn_engine::{
//!     entity, reconcile, Entity, FieldDef, FieldType, LogicalClock, ModelSchema, Schema, Value,
//! };
//!
//! // 1. Declare a model
//! let post = ModelSchema::new(
//!     "App.Post",
//!     "posts",
//!     1,
//!     vec![FieldDef::new("title", FieldType::String)],
//! );
//! let schema = Schema::new().with_model(post.clone());
//!
//! // 2. Create an entity and give it a key
//! let mut draft = Entity::new(&post).with("title", "Hello");
//! draft.ensure_key();
//!
//! // 3. Marshal it into the stored form
//! let clock = LogicalClock::with_counter(0);
//! let record = entity::to_stored(&draft, &post, &clock).unwrap();
//!
//! // 4. Resolve and decode what the store returns
//! let resolved = reconcile::resolve_siblings(&[record], None).unwrap();
//! let loaded = entity::from_merged(&resolved, &schema).unwrap();
//! assert_eq!(loaded.get("title"), Some(&Value::from("Hello")));
//! assert_eq!(loaded.id, draft.id);
//! ```

pub mod clock;
pub mod codec;
pub mod entity;
pub mod error;
pub mod migration;
pub mod operation;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod value;

// Re-export main types at crate root
pub use clock::{LogicalClock, BASELINE_TIMESTAMP};
pub use entity::{generate_key, CausalContext, Entity};
pub use error::{Error, Result};
pub use migration::{
    Migration, MigrationFailure, MigrationModulesError, MigrationRegistry, MigrationSettings,
    Migrator,
};
pub use operation::FieldOp;
pub use query::{CompileOptions, CompiledQuery, Datum, Expr, PostProcess, Query, QueryError};
pub use reconcile::{Resolved, Statebox};
pub use record::{RawRecord, RawValue, ReplicaToken, StoredObject};
pub use schema::{FieldDef, ModelSchema, Schema};
pub use value::{FieldType, Interval, ScalarType, Value};

/// Type aliases for clarity
pub type ModelName = String;
pub type FieldName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
