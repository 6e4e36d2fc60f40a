//! Named lookups of dialect engines and schemas.
//!
//! Both registries are filled during startup and frozen by
//! [`crate::init_with`]; later registrations fail with
//! [`Error::RegistryFrozen`].

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::dialect::{new_database, Database, DatabaseParams};
use crate::schema::{Schema, SchemaParams};
use crate::{Error, Result};

static DATABASES: Lazy<DatabaseRegistry> = Lazy::new(DatabaseRegistry::new);
static SCHEMAS: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::new);

/// Process-wide database registry
pub fn databases() -> &'static DatabaseRegistry {
    &DATABASES
}

/// Process-wide schema registry
pub fn schemas() -> &'static SchemaRegistry {
    &SCHEMAS
}

struct Entries<T: ?Sized> {
    items: BTreeMap<String, Arc<T>>,
    frozen: bool,
}

impl<T: ?Sized> Default for Entries<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            frozen: false,
        }
    }
}

/// Name-keyed map guarded for concurrent registration
struct Table<T: ?Sized> {
    what: &'static str,
    entries: RwLock<Entries<T>>,
}

impl<T: ?Sized> Table<T> {
    fn new(what: &'static str) -> Self {
        Self {
            what,
            entries: RwLock::new(Entries::default()),
        }
    }

    // a panic while holding the lock leaves the map itself consistent
    fn read(&self) -> RwLockReadGuard<'_, Entries<T>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries<T>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(
        &self,
        name: &str,
        item: Arc<T>,
        duplicate: impl FnOnce(String) -> Error,
    ) -> Result<Arc<T>> {
        let mut entries = self.write();
        if entries.frozen {
            return Err(Error::RegistryFrozen(self.what));
        }
        if entries.items.contains_key(name) {
            return Err(duplicate(name.to_string()));
        }
        entries.items.insert(name.to_string(), item.clone());
        debug!(registry = self.what, name, "registered");
        Ok(item)
    }

    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.read().items.get(name).cloned()
    }

    fn all(&self) -> Vec<Arc<T>> {
        self.read().items.values().cloned().collect()
    }

    fn freeze(&self) {
        self.write().frozen = true;
    }

    fn is_frozen(&self) -> bool {
        self.read().frozen
    }

    fn reset(&self) -> Vec<Arc<T>> {
        let mut entries = self.write();
        entries.frozen = false;
        std::mem::take(&mut entries.items).into_values().collect()
    }
}

/// Dialect engines keyed by logical database name
pub struct DatabaseRegistry {
    table: Table<dyn Database>,
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self {
            table: Table::new("database"),
        }
    }

    /// Validate `params` and register a new engine for them
    pub fn register(&self, params: DatabaseParams) -> Result<Arc<dyn Database>> {
        let db = new_database(params)?;
        self.register_engine(db)
    }

    /// Register an already built engine under its logical name
    pub fn register_engine(&self, db: Arc<dyn Database>) -> Result<Arc<dyn Database>> {
        let name = db.params().name.clone();
        self.table.insert(&name, db, Error::DuplicateDatabase)
    }

    /// Register every entry, stopping at the first failure
    pub fn register_all(&self, params: impl IntoIterator<Item = DatabaseParams>) -> Result<()> {
        for p in params {
            self.register(p)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Database>> {
        self.table
            .get(name)
            .ok_or_else(|| Error::DatabaseNotFound(name.to_string()))
    }

    /// Every engine, ordered by name
    pub fn all(&self) -> Vec<Arc<dyn Database>> {
        self.table.all()
    }

    pub fn freeze(&self) {
        self.table.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.table.is_frozen()
    }

    /// Empty and unfreeze the registry, handing back what it held
    pub fn reset(&self) -> Vec<Arc<dyn Database>> {
        self.table.reset()
    }
}

/// Schemas keyed by schema name
pub struct SchemaRegistry {
    table: Table<Schema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            table: Table::new("schema"),
        }
    }

    pub fn register(&self, params: SchemaParams) -> Result<Arc<Schema>> {
        let schema = Schema::new(params)?;
        self.register_schema(schema)
    }

    pub fn register_schema(&self, schema: Schema) -> Result<Arc<Schema>> {
        let name = schema.name().to_string();
        self.table
            .insert(&name, Arc::new(schema), Error::DuplicateSchema)
    }

    pub fn register_all(&self, params: impl IntoIterator<Item = SchemaParams>) -> Result<()> {
        for p in params {
            self.register(p)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Schema>> {
        self.table
            .get(name)
            .ok_or_else(|| Error::SchemaNotFound(name.to_string()))
    }

    /// Every schema, ordered by name
    pub fn all(&self) -> Vec<Arc<Schema>> {
        self.table.all()
    }

    pub fn freeze(&self) {
        self.table.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.table.is_frozen()
    }

    pub fn reset(&self) -> Vec<Arc<Schema>> {
        self.table.reset()
    }
}
