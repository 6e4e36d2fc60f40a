//! Multi-dialect table schemas for PostgreSQL and MySQL.
//!
//! Models describe their columns through annotations (usually with the
//! [`model!`] macro). At startup [`init`] connects every registered
//! database, creates missing tables and adds missing columns, then freezes
//! the registries. Afterwards each [`Schema`] offers CRUD over its table,
//! built from [`Query`] trees and write [`Payload`]s.

#[macro_use]
mod macros;

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
mod logging;
pub mod migration;
pub mod query;
pub mod registry;
pub mod schema;

#[cfg(test)]
mod migration_tests;
#[cfg(all(test, feature = "integration_tests"))]
mod integration_tests;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub use config::{Config, DEFAULT_MIGRATIONS_PATH};
pub use connection::{
    DatabaseConnection, DatabaseError, DatabaseResult, DatabaseRow, DatabaseTransaction,
    DatabaseValue,
};
pub use dialect::{
    new_database, Capabilities, ConflictClause, ConflictStrategy, DBColumnInfo, Database,
    DatabaseParams, Dialect, InsertExt, Payload, PreparedData, Returning, ReturningSupport,
    WriteOutcome,
};
pub use error::{Error, ErrorKind, Result};
pub use field::{extract_fields, FieldDescriptor, FieldKind, Model, ModelDescription, ModelField};
pub use logging::init_logging;
pub use migration::{migrate_schema, MigrationOutcome};
pub use query::Query;
pub use registry::{DatabaseRegistry, SchemaRegistry};
pub use schema::{FromRow, Schema, SchemaParams};

/// Register a database in the process-wide registry
pub fn register_database(params: DatabaseParams) -> Result<Arc<dyn Database>> {
    registry::databases().register(params)
}

/// Register a schema in the process-wide registry
pub fn register_schema(params: SchemaParams) -> Result<Arc<Schema>> {
    registry::schemas().register(params)
}

/// Look up a registered database
pub fn get_database(name: &str) -> Result<Arc<dyn Database>> {
    registry::databases().get(name)
}

/// Look up a registered schema
pub fn get_schema(name: &str) -> Result<Arc<Schema>> {
    registry::schemas().get(name)
}

/// Initialize the process-wide registries.
///
/// Databases listed in `config` are registered first. See [`init_with`].
pub async fn init(config: &Config) -> Result<()> {
    registry::databases().register_all(config.databases.iter().cloned())?;
    init_with(registry::databases(), registry::schemas(), config).await
}

/// Connect, bind and migrate everything in the given registries.
///
/// Every database is connected; every schema (in name order) is bound to
/// its master and optional replica and its table is synchronized. With
/// `config.migrate_data` the versioned scripts then run once per master
/// database. Both registries are frozen on success.
///
/// An error leaves the schemas partially migrated. Callers are expected
/// to abort startup on failure.
pub async fn init_with(
    databases: &DatabaseRegistry,
    schemas: &SchemaRegistry,
    config: &Config,
) -> Result<()> {
    for db in databases.all() {
        db.connect().await?;
    }

    let mut masters = BTreeSet::new();
    for schema in schemas.all() {
        let master = databases.get(schema.database_name())?;
        if !schema.is_bound() {
            let slave = match schema.slave_database_name() {
                Some(name) => Some(databases.get(name)?),
                None => None,
            };
            schema.bind(master.clone(), slave)?;
        }

        let outcome =
            migrate_schema(master.as_ref(), schema.table_name(), schema.fields()).await?;
        info!(
            schema = %schema.name(),
            table = %schema.table_name(),
            outcome = ?outcome,
            "schema synchronized"
        );
        masters.insert(schema.database_name().to_string());
    }

    if config.migrate_data {
        for name in &masters {
            databases.get(name)?.migrate(&config.migrations_path).await?;
        }
    }

    databases.freeze();
    schemas.freeze();
    info!(
        databases = databases.all().len(),
        schemas = schemas.all().len(),
        "initialization complete"
    );
    Ok(())
}

/// Close every process-wide database and empty both registries
pub async fn teardown() -> Result<()> {
    teardown_with(registry::databases(), registry::schemas()).await
}

/// Close every database in `databases` and empty both registries.
///
/// All connections are closed even when one fails; the first failure is
/// returned.
pub async fn teardown_with(databases: &DatabaseRegistry, schemas: &SchemaRegistry) -> Result<()> {
    schemas.reset();

    let mut first_error = None;
    for db in databases.reset() {
        if let Err(err) = db.close().await {
            warn!(database = %db.params().name, error = %err, "failed to close database");
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
