use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions};
use sqlx::query::Query;
use sqlx::{MySql, MySqlPool, Row};
use std::path::Path;
use std::sync::Arc;

use crate::connection::{
    DatabaseConnection, DatabaseError, DatabaseResult, DatabaseRow, DatabaseTransaction,
    DatabaseValue,
};

/// MySQL implementation of the database connection interface
#[derive(Clone)]
pub struct MySqlConnection {
    pool: Arc<MySqlPool>,
}

impl MySqlConnection {
    /// Open a pool against `url` holding at most `max_connections` connections
    pub async fn connect(url: &str, max_connections: u32) -> DatabaseResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Wrap an already configured pool
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

/// Bind parameters in order onto a prepared query
fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[DatabaseValue],
) -> DatabaseResult<Query<'q, MySql, MySqlArguments>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(None::<String>),
            DatabaseValue::Boolean(b) => query.bind(*b),
            DatabaseValue::Integer(i) => query.bind(*i),
            DatabaseValue::Float(f) => query.bind(*f),
            DatabaseValue::Text(s) => query.bind(s.clone()),
            DatabaseValue::Blob(b) => query.bind(b.clone()),
            DatabaseValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
            // CHAR(36) is the usual MySQL column for UUIDs
            DatabaseValue::Uuid(u) => query.bind(u.hyphenated().to_string()),
            DatabaseValue::Timestamp(t) => query.bind(*t),
            DatabaseValue::Array(_) => {
                return Err(DatabaseError::Query(
                    "MySQL does not support array parameters".to_string(),
                ))
            }
        };
    }
    Ok(query)
}

/// MySQL implementation of the database row interface
pub struct MySqlRow {
    row: sqlx::mysql::MySqlRow,
}

impl DatabaseRow for MySqlRow {
    fn get_string(&self, column: &str) -> DatabaseResult<String> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Decode(format!("failed to get string column {}: {}", column, e))
        })
    }

    fn get_i64(&self, column: &str) -> DatabaseResult<i64> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Decode(format!("failed to get i64 column {}: {}", column, e))
        })
    }

    fn get_f64(&self, column: &str) -> DatabaseResult<f64> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Decode(format!("failed to get f64 column {}: {}", column, e))
        })
    }

    fn get_bool(&self, column: &str) -> DatabaseResult<bool> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Decode(format!("failed to get bool column {}: {}", column, e))
        })
    }

    fn get_bytes(&self, column: &str) -> DatabaseResult<Vec<u8>> {
        self.row.try_get(column).map_err(|e| {
            DatabaseError::Decode(format!("failed to get bytes column {}: {}", column, e))
        })
    }

    fn try_get_string(&self, column: &str) -> DatabaseResult<Option<String>> {
        optional(self.row.try_get::<Option<String>, _>(column), column)
    }

    fn try_get_i64(&self, column: &str) -> DatabaseResult<Option<i64>> {
        optional(self.row.try_get::<Option<i64>, _>(column), column)
    }

    fn try_get_f64(&self, column: &str) -> DatabaseResult<Option<f64>> {
        optional(self.row.try_get::<Option<f64>, _>(column), column)
    }

    fn try_get_bool(&self, column: &str) -> DatabaseResult<Option<bool>> {
        optional(self.row.try_get::<Option<bool>, _>(column), column)
    }

    fn try_get_bytes(&self, column: &str) -> DatabaseResult<Option<Vec<u8>>> {
        optional(self.row.try_get::<Option<Vec<u8>>, _>(column), column)
    }
}

/// A missing column reads as `None`, the same as SQL NULL
fn optional<T>(result: Result<Option<T>, sqlx::Error>, column: &str) -> DatabaseResult<Option<T>> {
    match result {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(e) => Err(DatabaseError::Decode(format!(
            "failed to get column {}: {}",
            column, e
        ))),
    }
}

fn boxed_rows(rows: Vec<sqlx::mysql::MySqlRow>) -> Vec<Box<dyn DatabaseRow>> {
    rows.into_iter()
        .map(|row| Box::new(MySqlRow { row }) as Box<dyn DatabaseRow>)
        .collect()
}

/// MySQL implementation of the database transaction interface
pub struct MySqlTransaction {
    transaction: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl DatabaseTransaction for MySqlTransaction {
    async fn execute(&mut self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let result = bind_params(sqlx::query(query), params)?
            .execute(&mut *self.transaction)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn query(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_params(sqlx::query(query), params)?
            .fetch_all(&mut *self.transaction)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        Ok(boxed_rows(rows))
    }

    async fn query_one(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_params(sqlx::query(query), params)?
            .fetch_optional(&mut *self.transaction)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        Ok(row.map(|row| Box::new(MySqlRow { row }) as Box<dyn DatabaseRow>))
    }

    async fn commit(self: Box<Self>) -> DatabaseResult<()> {
        self.transaction
            .commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("failed to commit transaction: {e}")))
    }

    async fn rollback(self: Box<Self>) -> DatabaseResult<()> {
        self.transaction.rollback().await.map_err(|e| {
            DatabaseError::Transaction(format!("failed to rollback transaction: {e}"))
        })
    }
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    async fn execute(&self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        bind_params(sqlx::query(query), params)?
            .execute(&*self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| DatabaseError::Query(e.to_string()))
    }

    async fn query(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        bind_params(sqlx::query(query), params)?
            .fetch_all(&*self.pool)
            .await
            .map(boxed_rows)
            .map_err(|e| DatabaseError::Query(e.to_string()))
    }

    async fn query_one(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        bind_params(sqlx::query(query), params)?
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))
            .map(|opt_row| opt_row.map(|row| Box::new(MySqlRow { row }) as Box<dyn DatabaseRow>))
    }

    async fn execute_script(&self, script: &str) -> DatabaseResult<()> {
        sqlx::raw_sql(script)
            .execute(&*self.pool)
            .await
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
    }

    async fn run_migrations(&self, dir: &Path) -> DatabaseResult<()> {
        let migrator = sqlx::migrate::Migrator::new(dir.to_path_buf())
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        migrator
            .run(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        let transaction = self.pool.begin().await.map_err(|e| {
            DatabaseError::Transaction(format!("failed to begin transaction: {e}"))
        })?;

        Ok(Box::new(MySqlTransaction { transaction }) as Box<dyn DatabaseTransaction>)
    }

    async fn ping(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| DatabaseError::Connection(format!("failed to ping database: {e}")))?;

        Ok(())
    }

    async fn close(&self) -> DatabaseResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
