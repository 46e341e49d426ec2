//! Lazy schema migration.
//!
//! Records are migrated when they are read, one version at a time, from the
//! version they were stored at to the target version configured for their
//! lineage. Each step is a user-provided [`Migration`] module registered in
//! a [`MigrationRegistry`]; direction switches and target versions live in
//! an injected [`MigrationSettings`].
//!
//! A migration either runs every step between the two versions or fails
//! with a [`MigrationModulesError`]. It never skips a version.

mod registry;
mod settings;

pub use registry::{
    same_lineage, MigrationModule, MigrationRegistry, MigrationRegistryBuilder,
};
pub use settings::MigrationSettings;

use crate::{error::Result, Entity, ModelName, ModelSchema, SchemaVersion};
use std::sync::Arc;
use thiserror::Error;

/// One version step of a model lineage.
///
/// The engine sets the entity's version before calling either callback;
/// callbacks only transform field values.
pub trait Migration: Send + Sync {
    /// Version this module migrates to (forward) or from (backward).
    fn version(&self) -> SchemaVersion;

    /// Transform an entity stored at `version() - 1`.
    fn migrate_from_previous(&self, entity: Entity) -> Entity;

    /// Transform an entity stored at `version() + 1`.
    fn migrate_from_newer(&self, entity: Entity) -> Entity;
}

/// Why a migration path could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationFailure {
    #[error("modules '{first}' and '{second}' both declare version {version}")]
    DuplicateVersion {
        version: SchemaVersion,
        first: String,
        second: String,
    },

    #[error("no module declares version(s) {missing:?}")]
    MissingVersions { missing: Vec<SchemaVersion> },
}

/// A migration path between two versions is ambiguous or incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "cannot migrate '{model}' from version {current} to {target}: {failure} (steps needed: {expected_versions:?}, modules found: {found_modules:?})"
)]
pub struct MigrationModulesError {
    /// Model of the entity being migrated
    pub model: ModelName,
    /// Version the entity is stored at
    pub current: SchemaVersion,
    /// Version it was supposed to reach
    pub target: SchemaVersion,
    /// Module versions the path needs, in application order
    pub expected_versions: Vec<SchemaVersion>,
    /// Lineage modules found between the two versions, by version
    pub found_modules: Vec<String>,
    pub failure: MigrationFailure,
}

impl MigrationModulesError {
    /// First module of a duplicate-version pair.
    pub fn offending_module(&self) -> Option<&str> {
        match &self.failure {
            MigrationFailure::DuplicateVersion { first, .. } => Some(first),
            MigrationFailure::MissingVersions { .. } => None,
        }
    }
}

/// Applies registered migrations under the current settings.
#[derive(Debug, Clone)]
pub struct Migrator {
    registry: Arc<MigrationRegistry>,
    settings: Arc<MigrationSettings>,
}

impl Migrator {
    pub fn new(registry: Arc<MigrationRegistry>, settings: Arc<MigrationSettings>) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Arc<MigrationSettings> {
        &self.settings
    }

    /// Target version for the entity's lineage.
    pub fn target_version(&self, entity: &Entity) -> SchemaVersion {
        self.settings.get_target_version(&entity.model)
    }

    pub fn migration_required(&self, entity: &Entity) -> bool {
        entity.version.unwrap_or(0) != self.target_version(entity)
    }

    /// Modules to apply, in application order, to move `entity` to `target`.
    pub fn plan(
        &self,
        entity: &Entity,
        model: &ModelSchema,
        target: SchemaVersion,
    ) -> std::result::Result<Vec<&MigrationModule>, MigrationModulesError> {
        let current = entity.version.unwrap_or(0);
        let forward = target > current;
        let (low, high) = if forward {
            (current + 1, target)
        } else {
            (target, current.saturating_sub(1))
        };
        let mut expected_versions: Vec<SchemaVersion> = (low..=high).collect();
        if !forward {
            expected_versions.reverse();
        }

        // Every version the move touches, both ends included, must be
        // declared at most once even when its module is not applied.
        let touched = current.min(target)..=current.max(target);
        let mut modules: Vec<&MigrationModule> = self
            .registry
            .lineage(&entity.model, &model.bucket)
            .filter(|m| touched.contains(&m.version()))
            .collect();
        modules.sort_by_key(|m| m.version());

        let error = |modules: &[&MigrationModule], failure| MigrationModulesError {
            model: entity.model.clone(),
            current,
            target,
            expected_versions: expected_versions.clone(),
            found_modules: modules.iter().map(|m| m.name.clone()).collect(),
            failure,
        };

        if let Some(pair) = modules.windows(2).find(|w| w[0].version() == w[1].version()) {
            return Err(error(
                &modules,
                MigrationFailure::DuplicateVersion {
                    version: pair[0].version(),
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                },
            ));
        }

        modules.retain(|m| (low..=high).contains(&m.version()));
        let missing: Vec<SchemaVersion> = (low..=high)
            .filter(|v| !modules.iter().any(|m| m.version() == *v))
            .collect();
        if !missing.is_empty() {
            return Err(error(&modules, MigrationFailure::MissingVersions { missing }));
        }

        if !forward {
            modules.reverse();
        }
        Ok(modules)
    }

    /// Migrate an entity to its lineage's target version.
    ///
    /// Returns the entity unchanged when it is already at the target or the
    /// required direction is disabled.
    pub fn migrate(&self, entity: Entity, model: &ModelSchema) -> Result<Entity> {
        let current = entity.version.unwrap_or(0);
        let target = self.target_version(&entity);
        if current == target {
            return Ok(entity);
        }

        let forward = target > current;
        let enabled = if forward {
            self.settings.forward_enabled()
        } else {
            self.settings.backward_enabled()
        };
        if !enabled {
            tracing::debug!(
                model = %entity.model,
                current,
                target,
                forward,
                "migration direction disabled, leaving entity as stored"
            );
            return Ok(entity);
        }

        let steps = self.plan(&entity, model, target)?;
        let migrated = steps.into_iter().fold(entity, |mut entity, module| {
            let version = module.version();
            tracing::debug!(model = %entity.model, module = %module.name, version, "migration step");
            entity.version = Some(version);
            if forward {
                module.migration().migrate_from_previous(entity)
            } else {
                module.migration().migrate_from_newer(entity)
            }
        });
        Ok(migrated)
    }
}
