use crate::connection::DatabaseError;
use thiserror::Error;

/// Broad classification of every [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad model annotations or a malformed query tree
    Validation,
    /// The dialect cannot express the requested feature
    UnsupportedFeature,
    /// A catalog metadata query failed
    Catalog,
    /// Statement execution failed
    Execution,
    /// Name clashes or lookups in a registry
    Registration,
    /// Lifecycle or configuration misuse
    Configuration,
}

/// Unified error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("field '{field}' has no column type")]
    MissingColumnType { field: String },

    #[error("primary key field '{field}' must not be nullable")]
    InvalidPrimaryKey { field: String },

    #[error("field '{field}' has a non-numeric length '{value}'")]
    InvalidLength { field: String, value: String },

    #[error("sub-query in {clause} clause must have an alias")]
    MissingAlias { clause: &'static str },

    #[error("invalid FROM clause: {0}")]
    InvalidFromClause(String),

    #[error("write payload for table '{table}' matched no columns")]
    EmptyPayload { table: String },

    #[error("RETURNING needs at least one destination")]
    MissingReturningDestinations,

    #[error("{dialect} does not support RETURNING {detail}")]
    UnsupportedReturning {
        dialect: &'static str,
        detail: String,
    },

    #[error("{dialect} does not support ON CONFLICT")]
    UnsupportedOnConflict { dialect: &'static str },

    #[error("unsupported ON CONFLICT strategy: {0}")]
    UnsupportedConflictStrategy(String),

    #[error("catalog query on table '{table}' failed: {source}")]
    Catalog {
        table: String,
        #[source]
        source: DatabaseError,
    },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("data migration for database '{database}' failed: {source}")]
    Migration {
        database: String,
        #[source]
        source: DatabaseError,
    },

    #[error("database '{0}' is already registered")]
    DuplicateDatabase(String),

    #[error("schema '{0}' is already registered")]
    DuplicateSchema(String),

    #[error("schema name must not be empty")]
    EmptySchemaName,

    #[error("database name must not be empty")]
    EmptyDatabaseName,

    #[error("database '{0}' has no connection string")]
    MissingConnectionString(String),

    #[error("database '{0}' is not registered")]
    DatabaseNotFound(String),

    #[error("schema '{0}' is not registered")]
    SchemaNotFound(String),

    #[error("{0} registry is frozen")]
    RegistryFrozen(&'static str),

    #[error("database '{0}' is not connected")]
    NotConnected(String),

    #[error("schema '{0}' is not bound to a database")]
    SchemaNotBound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingColumnType { .. }
            | Error::InvalidPrimaryKey { .. }
            | Error::InvalidLength { .. }
            | Error::MissingAlias { .. }
            | Error::InvalidFromClause(_)
            | Error::EmptyPayload { .. }
            | Error::MissingReturningDestinations => ErrorKind::Validation,
            Error::UnsupportedReturning { .. }
            | Error::UnsupportedOnConflict { .. }
            | Error::UnsupportedConflictStrategy(_) => ErrorKind::UnsupportedFeature,
            Error::Catalog { .. } => ErrorKind::Catalog,
            Error::Database(_) | Error::Migration { .. } => ErrorKind::Execution,
            Error::DuplicateDatabase(_)
            | Error::DuplicateSchema(_)
            | Error::EmptySchemaName
            | Error::EmptyDatabaseName
            | Error::DatabaseNotFound(_)
            | Error::SchemaNotFound(_)
            | Error::RegistryFrozen(_) => ErrorKind::Registration,
            Error::MissingConnectionString(_)
            | Error::NotConnected(_)
            | Error::SchemaNotBound(_)
            | Error::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, Error>;
