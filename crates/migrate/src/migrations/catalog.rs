//! Migration registration and namespace-scoped catalogs.

use std::collections::HashMap;
use std::sync::Arc;

use super::definitions::Migration;
use crate::error::CatalogError;

/// Explicit list of migrations supplied by the host
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Arc<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration
    pub fn with<M: Migration + 'static>(self, migration: M) -> Self {
        self.with_arc(Arc::new(migration))
    }

    pub fn with_arc(mut self, migration: Arc<dyn Migration>) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn register(&mut self, migration: Arc<dyn Migration>) {
        self.migrations.push(migration);
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Reject non-positive ids, empty names and ids reused within a namespace
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen: HashMap<(&str, i64), &str> = HashMap::new();

        for migration in &self.migrations {
            let (id, name) = (migration.id(), migration.name());
            if id <= 0 {
                return Err(CatalogError::InvalidId {
                    name: name.to_string(),
                    id,
                });
            }
            if name.trim().is_empty() {
                return Err(CatalogError::EmptyName { id });
            }
            if let Some(first) = seen.insert((migration.namespace(), id), name) {
                return Err(CatalogError::DuplicateId {
                    namespace: migration.namespace().to_string(),
                    id,
                    first: first.to_string(),
                    second: name.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Build the sorted catalog of migrations whose namespace starts with `prefix`
    pub fn catalog(&self, prefix: &str) -> Result<MigrationCatalog, CatalogError> {
        self.validate()?;

        let mut migrations: Vec<Arc<dyn Migration>> = self
            .migrations
            .iter()
            .filter(|migration| migration.namespace().starts_with(prefix))
            .cloned()
            .collect();
        migrations.sort_by_key(|migration| migration.id());

        for pair in migrations.windows(2) {
            if pair[0].id() == pair[1].id() {
                return Err(CatalogError::DuplicateId {
                    namespace: prefix.to_string(),
                    id: pair[0].id(),
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                });
            }
        }

        Ok(MigrationCatalog {
            namespace: prefix.to_string(),
            migrations,
        })
    }
}

/// Migrations of one namespace, sorted ascending by id
#[derive(Clone)]
pub struct MigrationCatalog {
    namespace: String,
    migrations: Vec<Arc<dyn Migration>>,
}

impl MigrationCatalog {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    pub fn get(&self, id: i64) -> Option<&Arc<dyn Migration>> {
        self.migrations
            .binary_search_by_key(&id, |migration| migration.id())
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn ids(&self) -> Vec<i64> {
        self.migrations.iter().map(|migration| migration.id()).collect()
    }

    /// Migrations with an id strictly greater than the last applied one
    pub fn pending_after(&self, last_applied: Option<i64>) -> Vec<Arc<dyn Migration>> {
        self.migrations
            .iter()
            .filter(|migration| last_applied.map_or(true, |last| migration.id() > last))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for MigrationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCatalog")
            .field("namespace", &self.namespace)
            .field("ids", &self.ids())
            .finish()
    }
}
