//! CRUD and query facade.
//!
//! Each operation runs codec, store request, sibling resolution, migration
//! and post-processing in sequence. Every store request is bounded by the
//! configured timeout; nothing is retried here.

use crate::{
    config::AdapterConfig,
    error::{AdapterError, Result},
    store::{decode_hits, decode_object, KvStore, PutOptions, StoreError},
};
use cairn_engine::{
    entity::{from_merged, to_stored},
    query::{compile, CompileOptions, CompiledQuery, Datum, Fetch, QueryError},
    reconcile::resolve,
    CausalContext, Entity, Error, FieldName, LogicalClock, MigrationRegistry, MigrationSettings,
    Migrator, ModelSchema, Query, RawRecord, ReplicaToken, Schema, StoredObject, Value,
};
use std::future::Future;
use std::sync::Arc;

/// A change set entry: the new value of a field, or `None` to clear it.
pub type Change = (FieldName, Option<Value>);

/// Adapter over one store.
pub struct Adapter<S> {
    store: Arc<S>,
    schema: Arc<Schema>,
    migrator: Migrator,
    clock: Arc<LogicalClock>,
    config: AdapterConfig,
}

impl<S> Clone for Adapter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            schema: Arc::clone(&self.schema),
            migrator: self.migrator.clone(),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S: KvStore> Adapter<S> {
    /// An adapter without migration modules.
    pub fn new(store: S, schema: Schema, config: AdapterConfig) -> Self {
        Self::with_migrations(store, schema, MigrationRegistry::empty(), config)
    }

    pub fn with_migrations(
        store: S,
        schema: Schema,
        registry: MigrationRegistry,
        config: AdapterConfig,
    ) -> Self {
        let settings = Arc::new(MigrationSettings::with_directions(
            config.migrate_forward,
            config.migrate_backward,
        ));
        tracing::info!(
            models = schema.models.len(),
            migrations = registry.modules().len(),
            timeout_ms = config.timeout.as_millis() as u64,
            "adapter ready"
        );
        Self {
            store: Arc::new(store),
            schema: Arc::new(schema),
            migrator: Migrator::new(Arc::new(registry), settings),
            clock: Arc::new(LogicalClock::new()),
            config,
        }
    }

    /// Use a specific clock for write timestamps.
    pub fn with_clock(mut self, clock: Arc<LogicalClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Migration admin switches shared by every clone of this adapter.
    pub fn migrations(&self) -> &Arc<MigrationSettings> {
        self.migrator.settings()
    }

    /// Store a new entity, generating its key when absent.
    ///
    /// Returns the entity as the store holds it after the write.
    pub async fn insert(&self, mut entity: Entity) -> Result<Entity> {
        let model = self.schema.require_model(&entity.model)?;
        let key = entity.ensure_key().to_string();
        let record = to_stored(&entity, model, &self.clock)?;
        tracing::debug!(model = %model.name, %key, "insert");
        let token = entity.replica_token.clone();
        self.write(model, &key, record, token, entity).await
    }

    /// Apply a change set to a previously read entity and write it back.
    ///
    /// Only fields whose content differs from the last read are stamped, so
    /// untouched fields never override concurrent writers.
    pub async fn update<I, F>(&self, mut entity: Entity, changes: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (F, Option<Value>)>,
        F: Into<FieldName>,
    {
        let model = self.schema.require_model(&entity.model)?;
        for (field, value) in changes {
            let field = field.into();
            let def = model.require_field(&field)?;
            match value {
                Some(value) => {
                    def.validate(&value)?;
                    entity.set(field, value);
                }
                None => {
                    entity.remove(&field);
                }
            }
        }

        let key = primary_key(&entity)?;
        let record = to_stored(&entity, model, &self.clock)?;
        tracing::debug!(model = %model.name, %key, stamped = record.timestamps.len(), "update");
        let token = entity.replica_token.clone();
        self.write(model, &key, record, token, entity).await
    }

    pub async fn delete(&self, entity: &Entity) -> Result<()> {
        let model = self.schema.require_model(&entity.model)?;
        let key = primary_key(entity)?;
        tracing::debug!(model = %model.name, %key, "delete");
        self.call("delete", self.store.delete(&model.bucket, &key))
            .await
    }

    /// Fetch one entity by key. Absent keys yield `None`.
    pub async fn get(&self, model: &str, key: &str) -> Result<Option<Entity>> {
        let model = self.schema.require_model(model)?;
        self.fetch_key(model, key).await
    }

    /// Run a query and post-process its results.
    pub async fn all(&self, query: &Query) -> Result<Vec<Datum>> {
        let compiled = self.compile(query)?;
        let entities = self.fetch(&compiled).await?;
        Ok(compiled.post.run(entities)?)
    }

    /// Apply one change set to every entity a query matches. Returns the
    /// number of entities written.
    pub async fn update_all(&self, query: &Query, changes: &[Change]) -> Result<usize> {
        let model = self.schema.require_model(&query.from)?;
        for (field, value) in changes {
            let def = model.require_field(field)?;
            if let Some(value) = value {
                def.validate(value)?;
            }
        }

        let mut written = 0;
        for entity in self.targets(query).await? {
            // Search hits carry no token; read the key again so the write
            // replaces the siblings it was based on.
            let current = if entity.replica_token.is_some() {
                Some(entity)
            } else {
                let key = primary_key(&entity)?;
                self.fetch_key(model, &key).await?
            };
            let Some(current) = current else {
                continue;
            };
            self.update(current, changes.iter().cloned()).await?;
            written += 1;
        }

        tracing::debug!(model = %model.name, written, "update_all");
        Ok(written)
    }

    /// Delete every entity a query matches. Returns the number deleted.
    pub async fn delete_all(&self, query: &Query) -> Result<usize> {
        let targets = self.targets(query).await?;
        for entity in &targets {
            self.delete(entity).await?;
        }
        tracing::debug!(model = %query.from, deleted = targets.len(), "delete_all");
        Ok(targets.len())
    }

    fn compile(&self, query: &Query) -> Result<CompiledQuery> {
        let options = CompileOptions {
            max_rows: self.config.max_rows,
        };
        Ok(compile(query, &self.schema, &options)?)
    }

    /// Entities a bulk operation applies to.
    async fn targets(&self, query: &Query) -> Result<Vec<Entity>> {
        if query.select.is_some() || !query.group_bys.is_empty() || !query.havings.is_empty() {
            return Err(QueryError::Unsupported(
                "select, group_by and having in bulk operations".into(),
            )
            .into());
        }
        let compiled = self.compile(query)?;
        let entities = self.fetch(&compiled).await?;
        let rows = compiled.post.run(entities)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Datum::Entity(entity) => Some(*entity),
                _ => None,
            })
            .collect())
    }

    async fn fetch(&self, compiled: &CompiledQuery) -> Result<Vec<Entity>> {
        let model = self.schema.require_model(&compiled.model)?;
        match &compiled.fetch {
            Fetch::Key { key, .. } => Ok(self.fetch_key(model, key).await?.into_iter().collect()),
            Fetch::Search(search) => {
                let hits = self
                    .call(
                        "search",
                        self.store
                            .search(&search.index, &search.query, &search.options),
                    )
                    .await?;
                let objects = decode_hits(hits)?;
                tracing::debug!(
                    model = %model.name,
                    query = %search.query,
                    objects = objects.len(),
                    "search returned"
                );
                let mut entities = Vec::with_capacity(objects.len());
                for object in &objects {
                    if let Some(entity) = self.load(model, object)? {
                        entities.push(entity);
                    }
                }
                Ok(entities)
            }
        }
    }

    async fn fetch_key(&self, model: &ModelSchema, key: &str) -> Result<Option<Entity>> {
        let object = self
            .call("get", self.store.get(&model.bucket, key))
            .await?;
        match object {
            Some(object) => self.load(model, &decode_object(object)?),
            None => Ok(None),
        }
    }

    /// Resolve, decode and migrate a stored object of `model`.
    fn load(&self, model: &ModelSchema, object: &StoredObject) -> Result<Option<Entity>> {
        let Some(resolved) = resolve(object) else {
            return Ok(None);
        };
        if resolved.model != model.name {
            tracing::debug!(
                expected = %model.name,
                found = %resolved.model,
                "skipping record of another model"
            );
            return Ok(None);
        }
        let entity = from_merged(&resolved, &self.schema)?;
        Ok(Some(self.migrator.migrate(entity, model)?))
    }

    async fn write(
        &self,
        model: &ModelSchema,
        key: &str,
        record: RawRecord,
        token: Option<ReplicaToken>,
        written: Entity,
    ) -> Result<Entity> {
        let options = PutOptions {
            token,
            return_body: true,
        };
        let returned = self
            .call(
                "put",
                self.store.put(&model.bucket, key, record.to_bytes(), options),
            )
            .await?;

        let resolved = match returned {
            Some(object) => resolve(&decode_object(object)?),
            None => None,
        };
        let entity = match resolved {
            Some(resolved) => from_merged(&resolved, &self.schema)?,
            None => {
                let mut entity = written;
                entity.context = Some(CausalContext::capture(&entity));
                entity
            }
        };
        Ok(self.migrator.migrate(entity, model)?)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.config.timeout.as_millis() as u64, "store request timed out");
                Err(AdapterError::Timeout {
                    operation,
                    timeout: self.config.timeout,
                })
            }
        }
    }
}

fn primary_key(entity: &Entity) -> Result<String> {
    entity
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::MissingPrimaryKey(entity.model.clone()).into())
}
