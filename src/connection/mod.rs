use async_trait::async_trait;
use std::fmt::{self, Display};
use std::path::Path;
use thiserror::Error;

/// Error type for driver-level operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("query error: {0}")]
    Query(String),

    /// Transaction error
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// A column could not be read or converted
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result type for driver-level operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Represents a row from a database query
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get_string(&self, column: &str) -> DatabaseResult<String>;
    fn get_i64(&self, column: &str) -> DatabaseResult<i64>;
    fn get_f64(&self, column: &str) -> DatabaseResult<f64>;
    fn get_bool(&self, column: &str) -> DatabaseResult<bool>;
    fn get_bytes(&self, column: &str) -> DatabaseResult<Vec<u8>>;

    /// Try to get a column value by name, returning None if the column doesn't exist or is NULL
    fn try_get_string(&self, column: &str) -> DatabaseResult<Option<String>>;
    fn try_get_i64(&self, column: &str) -> DatabaseResult<Option<i64>>;
    fn try_get_f64(&self, column: &str) -> DatabaseResult<Option<f64>>;
    fn try_get_bool(&self, column: &str) -> DatabaseResult<Option<bool>>;
    fn try_get_bytes(&self, column: &str) -> DatabaseResult<Option<Vec<u8>>>;
}

/// Pooled connection to a single database.
///
/// This is the seam between the dialect engines and the SQL driver. The
/// engines only ever hand it finished SQL text and an ordered parameter list.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a query that returns no rows
    async fn execute(&self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query that returns rows
    async fn query(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query that returns a single row
    async fn query_one(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Run an unparameterized script, possibly holding several statements
    async fn execute_script(&self, script: &str) -> DatabaseResult<()>;

    /// Apply the versioned migration scripts found in `dir`
    async fn run_migrations(&self, dir: &Path) -> DatabaseResult<()>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>>;

    /// Check if the connection is alive
    async fn ping(&self) -> DatabaseResult<()>;

    /// Close the connection
    async fn close(&self) -> DatabaseResult<()>;
}

/// Database transaction interface
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a query within the transaction that returns no rows
    async fn execute(&mut self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query within the transaction that returns rows
    async fn query(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query within the transaction that returns a single row
    async fn query_one(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DatabaseResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> DatabaseResult<()>;
}

/// Represents a parameter value for database queries
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
    /// JSON document
    Json(serde_json::Value),
    /// UUID
    Uuid(uuid::Uuid),
    /// UTC timestamp
    Timestamp(chrono::DateTime<chrono::Utc>),
    /// Array of values
    Array(Vec<DatabaseValue>),
}

impl DatabaseValue {
    /// Whether the value is the zero value of its type.
    ///
    /// Zero values are left out when a model instance is turned into an
    /// INSERT/UPDATE payload.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Boolean(b) => !*b,
            Self::Integer(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::Text(s) => s.is_empty(),
            Self::Blob(b) => b.is_empty(),
            Self::Json(v) => v.is_null(),
            Self::Uuid(u) => u.is_nil(),
            Self::Timestamp(t) => t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0,
            Self::Array(a) => a.is_empty(),
        }
    }
}

impl Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "<blob of {} bytes>", b.len()),
            Self::Json(v) => write!(f, "{v}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for DatabaseValue {
                fn from(value: $ty) -> Self {
                    DatabaseValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Boolean,
    i8 => Integer,
    i16 => Integer,
    i32 => Integer,
    i64 => Integer,
    u8 => Integer,
    u16 => Integer,
    u32 => Integer,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Blob,
    serde_json::Value => Json,
    uuid::Uuid => Uuid,
    chrono::DateTime<chrono::Utc> => Timestamp,
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DatabaseValue::Null, Into::into)
    }
}

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "mysql")]
pub use mysql::MySqlConnection;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert!(DatabaseValue::Null.is_zero());
        assert!(DatabaseValue::Integer(0).is_zero());
        assert!(DatabaseValue::Text(String::new()).is_zero());
        assert!(DatabaseValue::Boolean(false).is_zero());
        assert!(DatabaseValue::Uuid(uuid::Uuid::nil()).is_zero());

        assert!(!DatabaseValue::Integer(-1).is_zero());
        assert!(!DatabaseValue::Text("x".to_string()).is_zero());
        assert!(!DatabaseValue::Json(serde_json::json!({})).is_zero());
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(DatabaseValue::from(7_i32), DatabaseValue::Integer(7));
        assert_eq!(DatabaseValue::from("a"), DatabaseValue::Text("a".to_string()));
        assert_eq!(DatabaseValue::from(None::<i64>), DatabaseValue::Null);
        assert_eq!(DatabaseValue::from(Some(2.5_f64)), DatabaseValue::Float(2.5));
    }

    #[test]
    fn test_display() {
        let array = DatabaseValue::Array(vec![
            DatabaseValue::Integer(1),
            DatabaseValue::Text("b".to_string()),
        ]);
        assert_eq!(array.to_string(), "[1, b]");
        assert_eq!(DatabaseValue::Blob(vec![1, 2, 3]).to_string(), "<blob of 3 bytes>");
    }
}
