//! Registry of versioned migration modules.
//!
//! Modules are registered explicitly at startup. A module belongs to a
//! model's lineage when their qualified names are related and they store
//! into the same bucket, so a new version plugs in by registering one more
//! module under a sibling name.

use super::Migration;
use crate::SchemaVersion;
use std::fmt;
use std::sync::Arc;

/// One registered migration module.
#[derive(Clone)]
pub struct MigrationModule {
    /// Qualified module name, e.g. `App.Post.V2`
    pub name: String,
    /// Bucket the module's records live in
    pub bucket: String,
    migration: Arc<dyn Migration>,
}

impl MigrationModule {
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        migration: impl Migration + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            migration: Arc::new(migration),
        }
    }

    pub fn version(&self) -> SchemaVersion {
        self.migration.version()
    }

    pub fn migration(&self) -> &dyn Migration {
        self.migration.as_ref()
    }
}

impl fmt::Debug for MigrationModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationModule")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("version", &self.version())
            .finish()
    }
}

/// Every migration module known to the process.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    modules: Vec<MigrationModule>,
}

impl MigrationRegistry {
    pub fn builder() -> MigrationRegistryBuilder {
        MigrationRegistryBuilder::default()
    }

    /// A registry without any module.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn modules(&self) -> &[MigrationModule] {
        &self.modules
    }

    /// Modules sharing a lineage with `model` and stored in `bucket`, in
    /// registration order.
    pub fn lineage<'a, 'b>(
        &'a self,
        model: &'b str,
        bucket: &'b str,
    ) -> impl Iterator<Item = &'a MigrationModule> + 'b
    where
        'a: 'b,
    {
        self.modules
            .iter()
            .filter(move |m| m.bucket == bucket && same_lineage(&m.name, model))
    }
}

/// Builder collecting modules before the registry is shared.
#[derive(Debug, Default)]
pub struct MigrationRegistryBuilder {
    modules: Vec<MigrationModule>,
}

impl MigrationRegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        bucket: impl Into<String>,
        migration: impl Migration + 'static,
    ) -> Self {
        self.modules
            .push(MigrationModule::new(name, bucket, migration));
        self
    }

    pub fn build(self) -> MigrationRegistry {
        MigrationRegistry {
            modules: self.modules,
        }
    }
}

fn components(name: &str) -> Vec<&str> {
    name.split(|c| c == '.' || c == ':')
        .filter(|part| !part.is_empty())
        .collect()
}

/// Whether two qualified names belong to the same lineage.
///
/// True when one name's components are a strict prefix of the other's, or
/// when both have the same number of components and differ at most in the
/// last one. `.` and `::` both separate components.
pub fn same_lineage(a: &str, b: &str) -> bool {
    let a = components(a);
    let b = components(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if shorter.len() < longer.len() {
        return longer.starts_with(shorter);
    }
    a[..a.len() - 1] == b[..b.len() - 1]
}
