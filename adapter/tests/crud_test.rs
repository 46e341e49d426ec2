//! Integration tests for entity writes and reads through the adapter.

mod common;

use cairn_adapter::{Adapter, AdapterConfig, AdapterError, KvStore, MemoryStore, PutOptions};
use cairn_engine::{
    Entity, Error, Migration, MigrationRegistry, RawRecord, SchemaVersion, Value,
};
use common::{adapter, adapter_with, post, post_model, schema};
use std::time::Duration;

#[tokio::test]
async fn test_insert_get_delete() {
    let adapter = adapter();

    let saved = adapter.insert(post("Hello", 3, "news")).await.unwrap();
    let key = saved.id.clone().unwrap();
    assert_eq!(key.len(), 24);
    assert!(!key.contains('/') && !key.contains('+'));
    assert_eq!(saved.version, Some(1));
    assert!(saved.replica_token.is_some());
    assert!(saved.context.is_some());

    let loaded = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(loaded.get("title"), Some(&Value::from("Hello")));
    assert_eq!(loaded.get("views"), Some(&Value::Integer(3)));
    assert_eq!(loaded.fields, saved.fields);

    adapter.delete(&loaded).await.unwrap();
    assert!(adapter.get("App.Post", &key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_insert_keeps_given_key() {
    let adapter = adapter();
    let saved = adapter
        .insert(post("Keyed", 1, "news").with_id("my-key"))
        .await
        .unwrap();
    assert_eq!(saved.id.as_deref(), Some("my-key"));
    assert!(adapter.get("App.Post", "my-key").await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_key_is_absent() {
    let adapter = adapter();
    assert!(adapter.get("App.Post", "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_model_and_field() {
    let adapter = adapter();
    assert!(matches!(
        adapter.get("App.Comment", "k").await,
        Err(AdapterError::Engine(Error::UnknownModel(_)))
    ));

    let saved = adapter.insert(post("a", 1, "x")).await.unwrap();
    let err = adapter
        .update(saved, [("body", Some(Value::from("text")))])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Engine(Error::UnknownField { ref field, .. }) if field == "body"
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_update_rejects_mistyped_value() {
    let adapter = adapter();
    let saved = adapter.insert(post("a", 1, "x")).await.unwrap();
    let err = adapter
        .update(saved, [("views", Some(Value::from("many")))])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Engine(Error::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_write_preconditions() {
    let adapter = adapter();

    let mut unversioned = post("a", 1, "x");
    unversioned.version = None;
    assert!(matches!(
        adapter.insert(unversioned).await,
        Err(AdapterError::Engine(Error::MissingVersion(_)))
    ));

    let mut no_context = post("a", 1, "x");
    no_context.context = None;
    assert!(matches!(
        adapter.insert(no_context).await,
        Err(AdapterError::Engine(Error::MissingContext(_)))
    ));

    assert!(matches!(
        adapter.delete(&post("a", 1, "x")).await,
        Err(AdapterError::Engine(Error::MissingPrimaryKey(_)))
    ));
    assert_eq!(adapter.store().calls().total(), 0);
}

#[tokio::test]
async fn test_update_and_clear_fields() {
    let adapter = adapter();
    let saved = adapter.insert(post("a", 1, "x")).await.unwrap();
    let key = saved.id.clone().unwrap();

    let updated = adapter
        .update(
            saved,
            [
                ("title", Some(Value::from("b"))),
                ("category", None),
            ],
        )
        .await
        .unwrap();
    assert_eq!(updated.get("title"), Some(&Value::from("b")));
    assert_eq!(updated.get("category"), None);

    let loaded = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(loaded.fields, updated.fields);
    assert_eq!(adapter.store().sibling_count("posts", &key), 1);
}

#[tokio::test]
async fn test_concurrent_updates_merge_per_field() {
    let adapter = adapter();
    let saved = adapter.insert(post("draft", 1, "x")).await.unwrap();
    let key = saved.id.clone().unwrap();

    // Two clients read the same version.
    let a = adapter.get("App.Post", &key).await.unwrap().unwrap();
    let b = adapter.get("App.Post", &key).await.unwrap().unwrap();

    adapter
        .update(a, [("title", Some(Value::from("final")))])
        .await
        .unwrap();
    // b's token is stale now, so its write lands as a sibling.
    let merged = adapter
        .update(b, [("views", Some(Value::Integer(42)))])
        .await
        .unwrap();
    assert_eq!(adapter.store().sibling_count("posts", &key), 2);

    // Each writer only stamped the field it changed, so both changes win.
    assert_eq!(merged.get("title"), Some(&Value::from("final")));
    assert_eq!(merged.get("views"), Some(&Value::Integer(42)));
    assert_eq!(merged.get("category"), Some(&Value::from("x")));

    let loaded = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(loaded.fields, merged.fields);

    // Writing back with the merged token collapses the siblings.
    adapter.update(loaded, Vec::<(String, Option<Value>)>::new()).await.unwrap();
    assert_eq!(adapter.store().sibling_count("posts", &key), 1);
}

#[tokio::test]
async fn test_concurrent_list_additions_union() {
    let adapter = adapter();
    let saved = adapter
        .insert(post("a", 1, "x").with("tags", vec!["base"]))
        .await
        .unwrap();
    let key = saved.id.clone().unwrap();

    let a = adapter.get("App.Post", &key).await.unwrap().unwrap();
    let b = adapter.get("App.Post", &key).await.unwrap().unwrap();
    adapter
        .update(a, [("tags", Some(Value::from(vec!["base", "rust"])))])
        .await
        .unwrap();
    let merged = adapter
        .update(b, [("tags", Some(Value::from(vec!["base", "db"])))])
        .await
        .unwrap();

    let Some(Value::List(tags)) = merged.get("tags") else {
        panic!("tags missing: {:?}", merged.fields);
    };
    let mut tags: Vec<_> = tags.iter().filter_map(Value::as_str).collect();
    tags.sort_unstable();
    assert_eq!(tags, vec!["base", "db", "rust"]);
}

#[tokio::test]
async fn test_corrupt_sibling_is_an_error() {
    let adapter = adapter();
    adapter
        .store()
        .put("posts", "bad", b"{not json".to_vec(), PutOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        adapter.get("App.Post", "bad").await,
        Err(AdapterError::Engine(Error::MalformedRecord(_)))
    ));
}

#[tokio::test]
async fn test_record_of_other_model_is_skipped() {
    let adapter = adapter();
    let record = RawRecord::new("App.User", 1);
    adapter
        .store()
        .put("posts", "stray", record.to_bytes(), PutOptions::default())
        .await
        .unwrap();
    assert!(adapter.get("App.Post", "stray").await.unwrap().is_none());
}

#[tokio::test]
async fn test_timeout_is_retryable() {
    common::init_tracing();
    let store = MemoryStore::new().with_latency(Duration::from_millis(200));
    let config = AdapterConfig::default().with_timeout(Duration::from_millis(20));
    let adapter = Adapter::new(store, schema(), config);

    let err = adapter.get("App.Post", "k").await.unwrap_err();
    assert!(matches!(err, AdapterError::Timeout { operation: "get", .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unavailable_store_is_retryable() {
    let adapter = adapter();
    adapter.store().set_unavailable(true);
    let err = adapter.insert(post("a", 1, "x")).await.unwrap_err();
    assert!(matches!(err, AdapterError::Store(_)));
    assert!(err.is_retryable());
}

struct Step {
    version: SchemaVersion,
    forward: fn(Entity) -> Entity,
    backward: fn(Entity) -> Entity,
}

impl Migration for Step {
    fn version(&self) -> SchemaVersion {
        self.version
    }

    fn migrate_from_previous(&self, entity: Entity) -> Entity {
        (self.forward)(entity)
    }

    fn migrate_from_newer(&self, entity: Entity) -> Entity {
        (self.backward)(entity)
    }
}

fn keep(entity: Entity) -> Entity {
    entity
}

fn upper_category(mut entity: Entity) -> Entity {
    if let Some(Value::String(category)) = entity.remove("category") {
        entity.set("category", category.to_uppercase());
    }
    entity
}

fn lower_category(mut entity: Entity) -> Entity {
    if let Some(Value::String(category)) = entity.remove("category") {
        entity.set("category", category.to_lowercase());
    }
    entity
}

fn post_lineage() -> MigrationRegistry {
    MigrationRegistry::builder()
        .register(
            "App.Post.V1",
            "posts",
            Step {
                version: 1,
                forward: keep,
                backward: lower_category,
            },
        )
        .register(
            "App.Post.V2",
            "posts",
            Step {
                version: 2,
                forward: upper_category,
                backward: keep,
            },
        )
        .build()
}

#[tokio::test]
async fn test_migrates_on_read() {
    let adapter = adapter_with(post_lineage());
    let saved = adapter.insert(post("a", 1, "news")).await.unwrap();
    let key = saved.id.clone().unwrap();

    // Target 0 is below the stored version and backward is off by default.
    let loaded = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(loaded.version, Some(1));

    adapter.migrations().set_target_version("App.Post", 2);
    let migrated = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(migrated.version, Some(2));
    assert_eq!(migrated.get("category"), Some(&Value::from("NEWS")));

    // Persist the migrated form, then pin readers back to version 1.
    adapter.update(migrated, Vec::<(String, Option<Value>)>::new()).await.unwrap();
    adapter.migrations().set_target_version("App.Post", 1);
    let pinned = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(pinned.version, Some(2));

    adapter.migrations().enable_backward();
    let downgraded = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(downgraded.version, Some(1));
    assert_eq!(downgraded.get("category"), Some(&Value::from("news")));
}

#[tokio::test]
async fn test_written_entity_is_migrated_like_a_read() {
    let adapter = adapter_with(post_lineage());
    adapter.migrations().set_target_version("App.Post", 2);

    let saved = adapter.insert(post("a", 1, "news")).await.unwrap();
    assert_eq!(saved.version, Some(2));
    assert_eq!(saved.get("category"), Some(&Value::from("NEWS")));

    let key = saved.id.clone().unwrap();
    let loaded = adapter.get("App.Post", &key).await.unwrap().unwrap();
    assert_eq!(loaded.version, saved.version);
    assert_eq!(loaded.fields, saved.fields);

    let updated = adapter
        .update(loaded, [("title", Some(Value::from("b")))])
        .await
        .unwrap();
    assert_eq!(updated.version, Some(2));
}

#[tokio::test]
async fn test_missing_migration_fails_loudly() {
    let registry = MigrationRegistry::builder()
        .register(
            "App.Post.V3",
            "posts",
            Step {
                version: 3,
                forward: upper_category,
                backward: keep,
            },
        )
        .build();
    let adapter = adapter_with(registry);
    let saved = adapter.insert(post("a", 1, "news")).await.unwrap();
    let key = saved.id.clone().unwrap();

    adapter.migrations().set_target_version("App.Post", 3);
    let err = adapter.get("App.Post", &key).await.unwrap_err();
    let details = match err {
        AdapterError::Engine(Error::MigrationModules(details)) => details,
        other => panic!("expected a migration error, got {other:?}"),
    };
    assert_eq!(details.current, 1);
    assert_eq!(details.target, 3);
    assert_eq!(details.expected_versions, vec![2, 3]);
    assert_eq!(details.found_modules, vec!["App.Post.V3".to_string()]);
}

#[tokio::test]
async fn test_adapter_clones_share_migration_switches() {
    let adapter = adapter();
    let clone = adapter.clone();
    clone.migrations().enable_backward();
    assert!(adapter.migrations().backward_enabled());
    assert_eq!(post_model().bucket, "posts");
}
