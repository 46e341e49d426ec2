//! Shared fixtures for adapter integration tests.

#![allow(dead_code)]

use cairn_adapter::{Adapter, AdapterConfig, MemoryStore};
use cairn_engine::{
    Entity, FieldDef, FieldType, MigrationRegistry, ModelSchema, ScalarType, Schema, Value,
};
use chrono::NaiveDate;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

pub fn post_model() -> ModelSchema {
    ModelSchema::new(
        "App.Post",
        "posts",
        1,
        vec![
            FieldDef::new("title", FieldType::String),
            FieldDef::new("views", FieldType::Integer),
            FieldDef::new("category", FieldType::String),
            FieldDef::new("tags", FieldType::List(ScalarType::String)),
            FieldDef::new("published", FieldType::DateTime),
            FieldDef::new("wait", FieldType::Interval),
        ],
    )
}

pub fn user_model() -> ModelSchema {
    ModelSchema::new(
        "App.User",
        "users",
        1,
        vec![FieldDef::new("name", FieldType::String)],
    )
}

pub fn schema() -> Schema {
    Schema::new()
        .with_model(post_model())
        .with_model(user_model())
}

pub fn adapter() -> Adapter<MemoryStore> {
    init_tracing();
    Adapter::new(MemoryStore::new(), schema(), AdapterConfig::default())
}

pub fn adapter_with(registry: MigrationRegistry) -> Adapter<MemoryStore> {
    init_tracing();
    Adapter::with_migrations(MemoryStore::new(), schema(), registry, AdapterConfig::default())
}

pub fn post(title: &str, views: i64, category: &str) -> Entity {
    Entity::new(&post_model())
        .with("title", title)
        .with("views", views)
        .with("category", category)
}

pub fn day(d: u32) -> Value {
    Value::DateTime(
        NaiveDate::from_ymd_opt(2024, 1, d)
            .and_then(|date| date.and_hms_opt(9, 30, 0))
            .unwrap(),
    )
}
