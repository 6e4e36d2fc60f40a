use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::path::Path;
use std::sync::Arc;

use crate::connection::{
    DatabaseConnection, DatabaseError, DatabaseResult, DatabaseRow, DatabaseTransaction,
    DatabaseValue,
};

/// PostgreSQL implementation of the database connection interface
#[derive(Clone)]
pub struct PostgresConnection {
    pool: Arc<PgPool>,
}

impl PostgresConnection {
    /// Open a pool against `url` holding at most `max_connections` connections
    pub async fn connect(url: &str, max_connections: u32) -> DatabaseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Wrap an already configured pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

/// Bind parameters in order onto a prepared query
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> DatabaseResult<Query<'q, Postgres, PgArguments>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(None::<String>),
            DatabaseValue::Boolean(b) => query.bind(*b),
            DatabaseValue::Integer(i) => query.bind(*i),
            DatabaseValue::Float(f) => query.bind(*f),
            DatabaseValue::Text(s) => query.bind(s.clone()),
            DatabaseValue::Blob(b) => query.bind(b.clone()),
            DatabaseValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
            DatabaseValue::Uuid(u) => query.bind(*u),
            DatabaseValue::Timestamp(t) => query.bind(*t),
            DatabaseValue::Array(items) => bind_array(query, items)?,
        };
    }
    Ok(query)
}

/// Arrays bind as native PostgreSQL arrays and must be homogeneous
fn bind_array<'q>(
    query: Query<'q, Postgres, PgArguments>,
    items: &[DatabaseValue],
) -> DatabaseResult<Query<'q, Postgres, PgArguments>> {
    fn collect<T>(
        items: &[DatabaseValue],
        pick: impl Fn(&DatabaseValue) -> Option<T>,
    ) -> Option<Vec<T>> {
        items.iter().map(pick).collect()
    }

    let Some(first) = items.first() else {
        return Ok(query.bind(Vec::<String>::new()));
    };

    let bound = match first {
        DatabaseValue::Integer(_) => collect(items, |v| match v {
            DatabaseValue::Integer(i) => Some(*i),
            _ => None,
        })
        .map(|v| query.bind(v)),
        DatabaseValue::Float(_) => collect(items, |v| match v {
            DatabaseValue::Float(f) => Some(*f),
            _ => None,
        })
        .map(|v| query.bind(v)),
        DatabaseValue::Boolean(_) => collect(items, |v| match v {
            DatabaseValue::Boolean(b) => Some(*b),
            _ => None,
        })
        .map(|v| query.bind(v)),
        DatabaseValue::Text(_) => collect(items, |v| match v {
            DatabaseValue::Text(s) => Some(s.clone()),
            _ => None,
        })
        .map(|v| query.bind(v)),
        DatabaseValue::Uuid(_) => collect(items, |v| match v {
            DatabaseValue::Uuid(u) => Some(*u),
            _ => None,
        })
        .map(|v| query.bind(v)),
        _ => None,
    };

    bound.ok_or_else(|| {
        DatabaseError::Query("array parameters must hold scalars of a single type".to_string())
    })
}

/// PostgreSQL implementation of the database row interface
pub struct PostgresRow {
    row: sqlx::postgres::PgRow,
}

macro_rules! pg_row_getters {
    ($($get:ident / $try_get:ident => $ty:ty, $label:literal;)*) => {
        $(
            fn $get(&self, column: &str) -> DatabaseResult<$ty> {
                self.row.try_get(column).map_err(|e| {
                    DatabaseError::Decode(format!(
                        "failed to get {} column {}: {}",
                        $label, column, e
                    ))
                })
            }

            fn $try_get(&self, column: &str) -> DatabaseResult<Option<$ty>> {
                match self.row.try_get::<Option<$ty>, _>(column) {
                    Ok(value) => Ok(value),
                    Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
                    Err(e) => Err(DatabaseError::Decode(format!(
                        "failed to get {} column {}: {}",
                        $label, column, e
                    ))),
                }
            }
        )*
    };
}

impl DatabaseRow for PostgresRow {
    pg_row_getters! {
        get_string / try_get_string => String, "string";
        get_i64 / try_get_i64 => i64, "i64";
        get_f64 / try_get_f64 => f64, "f64";
        get_bool / try_get_bool => bool, "bool";
        get_bytes / try_get_bytes => Vec<u8>, "bytes";
    }
}

fn boxed_rows(rows: Vec<sqlx::postgres::PgRow>) -> Vec<Box<dyn DatabaseRow>> {
    rows.into_iter()
        .map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>)
        .collect()
}

/// PostgreSQL implementation of the database transaction interface
pub struct PostgresTransaction {
    transaction: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
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

        Ok(row.map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>))
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
impl DatabaseConnection for PostgresConnection {
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
            .map(|opt_row| opt_row.map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>))
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

        Ok(Box::new(PostgresTransaction { transaction }) as Box<dyn DatabaseTransaction>)
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
