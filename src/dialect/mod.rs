//! Dialect engines: SQL generation and execution for one backend each.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::connection::{DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::field::FieldDescriptor;
use crate::query::Query;
use crate::{Error, Result};

mod mysql;
mod postgres;
mod prepared;

pub use mysql::MySqlDatabase;
pub use postgres::PostgresDatabase;
pub use prepared::{Assignment, Payload, PreparedData};

/// Default cap on open pooled connections
pub const MAX_OPEN_CONNS: u32 = 100;

/// Storage engine used for MySQL tables unless `ext.engine` says otherwise
pub const DEFAULT_MYSQL_ENGINE: &str = "InnoDB";

/// Supported SQL backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgresql")]
    Postgres,
    MySql,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(Error::Config(format!("unknown dialect '{other}'"))),
        }
    }
}

fn default_max_open_conns() -> u32 {
    MAX_OPEN_CONNS
}

/// Connection identity of one database
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseParams {
    /// Name the database is registered under
    pub name: String,
    /// Physical database name, defaults to `name`
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(alias = "driver")]
    pub dialect: Dialect,
    pub connection_string: SecretString,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    /// Dialect specific settings, e.g. `engine` for MySQL
    #[serde(default)]
    pub ext: HashMap<String, String>,
}

impl DatabaseParams {
    pub fn new(
        name: impl Into<String>,
        dialect: Dialect,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            db_name: None,
            dialect,
            connection_string: SecretString::new(connection_string.into()),
            max_open_conns: MAX_OPEN_CONNS,
            ext: HashMap::new(),
        }
    }

    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn with_max_open_conns(mut self, max: u32) -> Self {
        self.max_open_conns = max;
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ext.insert(key.into(), value.into());
        self
    }

    /// Physical database name
    pub fn db_name(&self) -> &str {
        match self.db_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.name,
        }
    }

    /// Validate and fill defaults
    fn normalized(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyDatabaseName);
        }
        if self.connection_string.expose_secret().is_empty() {
            return Err(Error::MissingConnectionString(self.name));
        }
        if self.db_name.as_deref().map_or(true, str::is_empty) {
            self.db_name = Some(self.name.clone());
        }
        if self.max_open_conns == 0 {
            self.max_open_conns = MAX_OPEN_CONNS;
        }
        Ok(self)
    }
}

/// Live metadata of one column as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBColumnInfo {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub length: i64,
    pub default: Option<String>,
}

impl DBColumnInfo {
    fn from_row(row: &dyn DatabaseRow, nullable: bool) -> Result<Self> {
        Ok(Self {
            name: row.get_string("name")?,
            column_type: row.get_string("type")?,
            nullable,
            length: row.try_get_i64("length")?.unwrap_or_default(),
            default: row.try_get_string("default")?,
        })
    }
}

/// Columns to hand back from a write statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Returning {
    /// Raw RETURNING list, e.g. `id, created_at`
    pub list: String,
    /// Number of values the caller expects back
    pub destinations: usize,
}

impl Returning {
    pub fn new(list: impl Into<String>, destinations: usize) -> Self {
        Self {
            list: list.into(),
            destinations,
        }
    }

    /// One destination per column
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns: Vec<String> = columns.into_iter().map(|c| c.as_ref().to_string()).collect();
        Self::new(columns.join(", "), columns.len())
    }

    fn validate(&self) -> Result<()> {
        if self.destinations == 0 || self.list.trim().is_empty() {
            return Err(Error::MissingReturningDestinations);
        }
        Ok(())
    }
}

/// What to do when an INSERT hits a uniqueness conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictStrategy {
    DoNothing,
    /// `DO UPDATE SET <assignments>`, not supported yet
    DoUpdate(String),
}

/// `ON CONFLICT (<object>) <strategy>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictClause {
    /// Conflict target, e.g. `email` or `ON CONSTRAINT users_pkey`; may be empty
    pub object: String,
    pub strategy: ConflictStrategy,
}

impl ConflictClause {
    pub fn do_nothing(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            strategy: ConflictStrategy::DoNothing,
        }
    }
}

/// Optional INSERT extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertExt {
    /// Insert only if `SELECT * FROM <table> WHERE <predicate>` finds nothing
    pub where_not_exists: Option<String>,
    pub on_conflict: Option<ConflictClause>,
    pub returning: Option<Returning>,
}

impl InsertExt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_not_exists(mut self, predicate: impl Into<String>) -> Self {
        self.where_not_exists = Some(predicate.into());
        self
    }

    pub fn on_conflict(mut self, clause: ConflictClause) -> Self {
        self.on_conflict = Some(clause);
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = Some(returning);
        self
    }
}

/// Result of an INSERT, UPDATE or DELETE
#[derive(Default)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// First RETURNING row, if one was requested and produced
    pub returned: Option<Box<dyn DatabaseRow>>,
}

impl fmt::Debug for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOutcome")
            .field("rows_affected", &self.rows_affected)
            .field("returned", &self.returned.is_some())
            .finish()
    }
}

/// SQL text together with its arguments in bind order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<DatabaseValue>,
}

/// How a dialect hands back values from write statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningSupport {
    /// `RETURNING` on INSERT, UPDATE and DELETE
    Full,
    /// Only the generated id of a single-row INSERT
    LastInsertId,
}

/// Optional features a dialect supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub returning: ReturningSupport,
    pub on_conflict: bool,
    /// All new columns are added by one ALTER TABLE statement
    pub batched_alter: bool,
}

/// Uniform contract of a dialect engine.
///
/// Every data operation accepts an optional caller-owned transaction; with
/// `None` the statement runs on the pooled connection.
#[async_trait]
pub trait Database: Send + Sync {
    fn params(&self) -> &DatabaseParams;

    fn dialect(&self) -> Dialect;

    fn capabilities(&self) -> Capabilities;

    /// Open the connection pool, a no-op when already connected
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn is_table_exists(&self, table: &str) -> Result<bool>;

    async fn get_columns_info(&self, table: &str) -> Result<Vec<DBColumnInfo>>;

    async fn create_table(&self, table: &str, fields: &[FieldDescriptor]) -> Result<()>;

    /// Add the given columns to an existing table
    async fn alter_table(&self, table: &str, fields: &[&FieldDescriptor]) -> Result<()>;

    /// Apply the versioned scripts in `<migrations_path>/<db name>`
    async fn migrate(&self, migrations_path: &Path) -> Result<()>;

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>>;

    async fn select(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<Box<dyn DatabaseRow>>>;

    /// Fetch at most one row
    async fn get(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<Box<dyn DatabaseRow>>>;

    async fn insert(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        prepared: &PreparedData,
        table: &str,
        ext: Option<&InsertExt>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome>;

    async fn update(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        prepared: &PreparedData,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome>;

    async fn delete(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome>;
}

/// Build the engine for `params`
pub fn new_database(params: DatabaseParams) -> Result<Arc<dyn Database>> {
    let params = params.normalized()?;
    let db: Arc<dyn Database> = match params.dialect {
        Dialect::Postgres => Arc::new(PostgresDatabase::new(params)),
        Dialect::MySql => Arc::new(MySqlDatabase::new(params)),
    };
    Ok(db)
}

/// Open the pool behind `cell` at most once.
///
/// Concurrent callers wait on the same attempt. The pool is pinged before it
/// is stored, and a failed attempt leaves the cell empty for the next caller.
async fn connect_once<F, Fut>(
    cell: &OnceCell<Arc<dyn DatabaseConnection>>,
    params: &DatabaseParams,
    open: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<dyn DatabaseConnection>>>,
{
    cell.get_or_try_init(|| async {
        let conn = open().await?;
        if let Err(err) = conn.ping().await {
            let _ = conn.close().await;
            return Err(Error::from(err));
        }
        info!(
            database = %params.name,
            dialect = %params.dialect,
            max_open_conns = params.max_open_conns,
            "connected"
        );
        Ok(conn)
    })
    .await?;
    Ok(())
}

/// Single-line rendering of a SELECT with LIMIT 1
fn single_row(query: &Query) -> Result<String> {
    let mut query = query.clone();
    query.limit = 1;
    query.compile()
}

/// Escape a value for use inside a single-quoted SQL literal
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

async fn run_query(
    conn: &dyn DatabaseConnection,
    tx: Option<&mut Box<dyn DatabaseTransaction>>,
    stmt: &Statement,
) -> Result<Vec<Box<dyn DatabaseRow>>> {
    debug!(sql = %stmt.sql, args = stmt.args.len(), "query");
    let rows = match tx {
        Some(tx) => tx.query(&stmt.sql, &stmt.args).await?,
        None => conn.query(&stmt.sql, &stmt.args).await?,
    };
    Ok(rows)
}

async fn run_query_one(
    conn: &dyn DatabaseConnection,
    tx: Option<&mut Box<dyn DatabaseTransaction>>,
    stmt: &Statement,
) -> Result<Option<Box<dyn DatabaseRow>>> {
    debug!(sql = %stmt.sql, args = stmt.args.len(), "query one");
    let row = match tx {
        Some(tx) => tx.query_one(&stmt.sql, &stmt.args).await?,
        None => conn.query_one(&stmt.sql, &stmt.args).await?,
    };
    Ok(row)
}

async fn run_execute(
    conn: &dyn DatabaseConnection,
    tx: Option<&mut Box<dyn DatabaseTransaction>>,
    stmt: &Statement,
) -> Result<u64> {
    debug!(sql = %stmt.sql, args = stmt.args.len(), "execute");
    let affected = match tx {
        Some(tx) => tx.execute(&stmt.sql, &stmt.args).await?,
        None => conn.execute(&stmt.sql, &stmt.args).await?,
    };
    Ok(affected)
}

/// Run a write statement, collecting RETURNING rows when asked for
async fn run_write(
    conn: &dyn DatabaseConnection,
    tx: Option<&mut Box<dyn DatabaseTransaction>>,
    stmt: &Statement,
    returning: bool,
) -> Result<WriteOutcome> {
    if !returning {
        let rows_affected = run_execute(conn, tx, stmt).await?;
        return Ok(WriteOutcome {
            rows_affected,
            returned: None,
        });
    }

    let rows = run_query(conn, tx, stmt).await?;
    Ok(WriteOutcome {
        rows_affected: rows.len() as u64,
        returned: rows.into_iter().next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_database_validation() {
        let empty_name = DatabaseParams::new("", Dialect::Postgres, "postgres://x");
        assert!(matches!(
            new_database(empty_name),
            Err(Error::EmptyDatabaseName)
        ));

        let no_url = DatabaseParams::new("main", Dialect::MySql, "");
        assert!(matches!(
            new_database(no_url),
            Err(Error::MissingConnectionString(name)) if name == "main"
        ));
    }

    #[test]
    fn test_new_database_defaults() {
        let db = new_database(
            DatabaseParams::new("main", Dialect::MySql, "mysql://x").with_max_open_conns(0),
        )
        .unwrap();

        assert_eq!(db.dialect(), Dialect::MySql);
        assert_eq!(db.params().db_name(), "main");
        assert_eq!(db.params().max_open_conns, MAX_OPEN_CONNS);
        assert_eq!(
            db.params().ext.get("engine").map(String::as_str),
            Some(DEFAULT_MYSQL_ENGINE)
        );
        assert_eq!(db.capabilities().returning, ReturningSupport::LastInsertId);

        let pg = new_database(
            DatabaseParams::new("main", Dialect::Postgres, "postgres://x").with_db_name("shop"),
        )
        .unwrap();
        assert_eq!(pg.params().db_name(), "shop");
        assert!(pg.capabilities().on_conflict);
    }

    #[test]
    fn test_params_debug_hides_secret() {
        let params = DatabaseParams::new("main", Dialect::Postgres, "postgres://u:hunter2@h/db");
        assert!(!format!("{params:?}").contains("hunter2"));
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mysql".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert!("oracle".parse::<Dialect>().is_err());
        assert_eq!(Dialect::MySql.to_string(), "mysql");
    }

    #[test]
    fn test_returning_columns() {
        let ret = Returning::columns(["id", "created_at"]);
        assert_eq!(ret.list, "id, created_at");
        assert_eq!(ret.destinations, 2);
        assert!(matches!(
            Returning::new("id", 0).validate(),
            Err(Error::MissingReturningDestinations)
        ));
    }

    #[tokio::test]
    async fn test_connect_once_shares_one_pool() {
        use crate::connection::mock::MockConnection;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let params = DatabaseParams::new("main", Dialect::Postgres, "postgres://x");
        let cell = OnceCell::new();
        let mock = MockConnection::new();
        let opened = AtomicUsize::new(0);
        let (opened, mock) = (&opened, &mock);
        let open = move || async move {
            opened.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Arc::new(mock.clone()) as Arc<dyn DatabaseConnection>)
        };

        let (a, b, c) = tokio::join!(
            connect_once(&cell, &params, open),
            connect_once(&cell, &params, open),
            connect_once(&cell, &params, open),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(mock.sql(), vec!["SELECT 1"]);
        assert!(cell.get().is_some());
        assert!(!mock.is_closed());
    }

    #[tokio::test]
    async fn test_connect_once_ping_failure() {
        use crate::connection::mock::MockConnection;

        let params = DatabaseParams::new("main", Dialect::MySql, "mysql://x");
        let cell = OnceCell::new();
        let mock = MockConnection::new();
        mock.fail_on("SELECT 1");

        let conn = Arc::new(mock.clone()) as Arc<dyn DatabaseConnection>;
        let result = connect_once(&cell, &params, move || async move {
            Ok(conn)
        })
        .await;
        assert!(result.is_err());
        assert!(cell.get().is_none());
        assert!(mock.is_closed());

        let result = connect_once(&cell, &params, || async {
            Err(Error::NotConnected("main".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::NotConnected(name)) if name == "main"));
        assert!(cell.get().is_none());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
