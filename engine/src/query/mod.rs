//! Query compilation and client-side post-processing.
//!
//! The store's search index answers term, range and boolean queries over
//! one bucket. Everything else a [`Query`] can express, grouping, group
//! filters, aggregate projections and type-aware ordering, runs over the
//! decoded entities in a [`PostProcess`] pipeline.

mod ast;
mod compiler;
mod error;
mod eval;
mod pipeline;

pub use ast::{Aggregate, BinOp, Direction, Expr, Function, Join, OrderBy, Query};
pub use compiler::{
    compile, escape, CompileOptions, CompiledQuery, Fetch, SearchOptions, SearchQuery,
    BUCKET_FIELD, DEFAULT_MAX_ROWS, DOC_ID_FIELD, KEY_FIELD, SCORE_FIELD,
};
pub use error::QueryError;
pub use eval::{arithmetic, evaluate, Datum};
pub use pipeline::PostProcess;
