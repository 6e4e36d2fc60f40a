use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    connect_once, quote_literal, run_query, run_query_one, run_write, single_row, Capabilities,
    DBColumnInfo, Database, DatabaseParams, Dialect, InsertExt, PreparedData, Returning,
    ReturningSupport, Statement, WriteOutcome, DEFAULT_MYSQL_ENGINE,
};
use crate::connection::{DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::field::FieldDescriptor;
use crate::query::Query;
use crate::{Error, Result};

const TABLE_EXISTS_SQL: &str = "SELECT CAST(EXISTS (SELECT TABLE_NAME FROM information_schema.TABLES WHERE TABLE_NAME = ?) AS SIGNED) AS `exists`";

const COLUMNS_INFO_SQL: &str = "SELECT COLUMN_NAME AS `name`, COLUMN_TYPE AS `type`, CAST((CASE IS_NULLABLE WHEN 'YES' THEN 1 ELSE 0 END) AS SIGNED) AS `nullable`, CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, 0) AS SIGNED) AS `length`, COLUMN_DEFAULT AS `default` FROM information_schema.COLUMNS WHERE TABLE_NAME = ?";

const NAME: &str = "MySQL";

/// MySQL dialect engine
pub struct MySqlDatabase {
    params: DatabaseParams,
    conn: OnceCell<Arc<dyn DatabaseConnection>>,
}

impl MySqlDatabase {
    pub fn new(mut params: DatabaseParams) -> Self {
        params
            .ext
            .entry("engine".to_string())
            .or_insert_with(|| DEFAULT_MYSQL_ENGINE.to_string());
        Self {
            params,
            conn: OnceCell::new(),
        }
    }

    /// Engine over an already opened connection
    pub fn with_connection(params: DatabaseParams, conn: Arc<dyn DatabaseConnection>) -> Self {
        Self {
            conn: OnceCell::new_with(Some(conn)),
            ..Self::new(params)
        }
    }

    fn conn(&self) -> Result<&dyn DatabaseConnection> {
        self.conn
            .get()
            .map(|c| &**c)
            .ok_or_else(|| Error::NotConnected(self.params.name.clone()))
    }

    #[cfg(feature = "mysql")]
    async fn open_pool(&self) -> Result<Arc<dyn DatabaseConnection>> {
        use secrecy::ExposeSecret;

        let conn = crate::connection::MySqlConnection::connect(
            self.params.connection_string.expose_secret(),
            self.params.max_open_conns,
        )
        .await?;
        Ok(Arc::new(conn))
    }

    #[cfg(not(feature = "mysql"))]
    async fn open_pool(&self) -> Result<Arc<dyn DatabaseConnection>> {
        Err(Error::Config(format!(
            "database '{}' needs the `mysql` feature",
            self.params.name
        )))
    }

    fn column_definition(&self, field: &FieldDescriptor) -> String {
        let mut sql = format!("{} {}", quote_ident(&field.db_name), field.base_type());
        if field.length > 0 {
            sql.push_str(&format!("({})", field.length));
        }
        if field.is_unsigned() {
            sql.push_str(" unsigned");
        }
        sql.push_str(if field.nullable { " NULL" } else { " NOT NULL" });
        if !field.default.is_empty() {
            sql.push_str(" DEFAULT ");
            sql.push_str(&field.default);
        }
        if !field.comment.is_empty() {
            sql.push_str(" COMMENT ");
            sql.push_str(&quote_literal(&field.comment));
        }
        sql
    }

    pub(crate) fn create_table_script(&self, table: &str, fields: &[FieldDescriptor]) -> String {
        let mut lines: Vec<String> = fields.iter().map(|f| self.column_definition(f)).collect();

        let pks: Vec<String> = fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| quote_ident(&f.db_name))
            .collect();
        if !pks.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", pks.join(", ")));
        }

        let engine = self
            .params
            .ext
            .get("engine")
            .map(String::as_str)
            .unwrap_or(DEFAULT_MYSQL_ENGINE);

        format!(
            "CREATE TABLE {} (\n{}\n) ENGINE={} DEFAULT CHARSET=utf8;",
            quote_ident(table),
            lines.join(",\n"),
            engine
        )
    }

    /// One statement per column, MySQL cannot batch ADD with our column syntax
    pub(crate) fn alter_table_statements(
        &self,
        table: &str,
        fields: &[&FieldDescriptor],
    ) -> Vec<String> {
        fields
            .iter()
            .map(|f| {
                format!(
                    "ALTER TABLE {} ADD {};",
                    quote_ident(table),
                    self.column_definition(f)
                )
            })
            .collect()
    }

    fn check_insert_ext(&self, ext: Option<&InsertExt>) -> Result<()> {
        let Some(ext) = ext else {
            return Ok(());
        };
        if ext.on_conflict.is_some() {
            return Err(Error::UnsupportedOnConflict { dialect: NAME });
        }
        if let Some(returning) = &ext.returning {
            returning.validate()?;
            if returning.destinations > 1 {
                return Err(Error::UnsupportedReturning {
                    dialect: NAME,
                    detail: format!(
                        "with {} destinations, only the last insert id is available",
                        returning.destinations
                    ),
                });
            }
        }
        Ok(())
    }

    /// INSERT with `?` placeholders: values first, then caller args
    pub(crate) fn insert_statement(
        &self,
        prepared: &PreparedData,
        table: &str,
        ext: Option<&InsertExt>,
        args: &[DatabaseValue],
    ) -> Result<Statement> {
        self.check_insert_ext(ext)?;
        if prepared.is_empty() {
            return Err(Error::EmptyPayload {
                table: table.to_string(),
            });
        }

        let mut sql = format!("INSERT INTO {table}");
        let columns = target_columns(prepared);
        if !columns.is_empty() {
            sql.push_str(&format!(" ({})", columns.join(", ")));
        }

        if let Some(source) = &prepared.source {
            sql.push(' ');
            sql.push_str(&source.compile()?);
            return Ok(Statement {
                sql,
                args: args.to_vec(),
            });
        }

        let mut values = vec!["?".to_string(); prepared.values.len()];
        for (_, query) in &prepared.subqueries {
            values.push(format!("({})", query.compile()?));
        }

        match ext.and_then(|e| e.where_not_exists.as_deref()) {
            Some(predicate) if !predicate.is_empty() => sql.push_str(&format!(
                " SELECT {} FROM DUAL WHERE NOT EXISTS (SELECT * FROM {} WHERE {})",
                values.join(", "),
                table,
                predicate
            )),
            _ => sql.push_str(&format!(" VALUES ({})", values.join(", "))),
        }

        let mut all_args = prepared.values.clone();
        all_args.extend_from_slice(args);
        Ok(Statement {
            sql,
            args: all_args,
        })
    }

    /// UPDATE with `?` placeholders: SET values first, then WHERE args
    pub(crate) fn update_statement(
        &self,
        prepared: &PreparedData,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<Statement> {
        if returning.is_some() {
            return Err(Error::UnsupportedReturning {
                dialect: NAME,
                detail: "on UPDATE".to_string(),
            });
        }
        if prepared.columns.is_empty() && prepared.subqueries.is_empty() {
            return Err(Error::EmptyPayload {
                table: table.to_string(),
            });
        }

        let mut sets: Vec<String> = prepared
            .columns
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect();
        for (column, query) in &prepared.subqueries {
            sets.push(format!("{} = ({})", quote_ident(column), query.compile()?));
        }

        let mut all_args = prepared.values.clone();
        all_args.extend_from_slice(args);
        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                sets.join(", "),
                where_clause
            ),
            args: all_args,
        })
    }

    pub(crate) fn delete_statement(
        &self,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<Statement> {
        if returning.is_some() {
            return Err(Error::UnsupportedReturning {
                dialect: NAME,
                detail: "on DELETE".to_string(),
            });
        }
        Ok(Statement {
            sql: format!("DELETE FROM {table} WHERE {where_clause}"),
            args: args.to_vec(),
        })
    }

    /// Run an INSERT and read back `LAST_INSERT_ID()` on the same connection
    async fn insert_returning_id(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        stmt: &Statement,
        returning: &Returning,
    ) -> Result<WriteOutcome> {
        debug!(sql = %stmt.sql, args = stmt.args.len(), "execute");
        let rows_affected = tx.execute(&stmt.sql, &stmt.args).await?;

        let column = returning.list.trim().trim_matches('`');
        let id_sql = format!(
            "SELECT CAST(LAST_INSERT_ID() AS SIGNED) AS {}",
            quote_ident(column)
        );
        debug!(sql = %id_sql, "query one");
        let returned = tx.query_one(&id_sql, &[]).await?;

        Ok(WriteOutcome {
            rows_affected,
            returned,
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn target_columns(prepared: &PreparedData) -> Vec<String> {
    prepared
        .columns
        .iter()
        .map(String::as_str)
        .chain(prepared.subqueries.iter().map(|(c, _)| c.as_str()))
        .map(quote_ident)
        .collect()
}

#[async_trait]
impl Database for MySqlDatabase {
    fn params(&self) -> &DatabaseParams {
        &self.params
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            returning: ReturningSupport::LastInsertId,
            on_conflict: false,
            batched_alter: false,
        }
    }

    async fn connect(&self) -> Result<()> {
        connect_once(&self.conn, &self.params, || self.open_pool()).await
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.get() {
            conn.close().await?;
        }
        Ok(())
    }

    async fn is_table_exists(&self, table: &str) -> Result<bool> {
        let catalog = |source| Error::Catalog {
            table: table.to_string(),
            source,
        };

        let row = self
            .conn()?
            .query_one(TABLE_EXISTS_SQL, &[DatabaseValue::from(table)])
            .await
            .map_err(catalog)?;

        match row {
            Some(row) => Ok(row.get_i64("exists").map_err(catalog)? == 1),
            None => Ok(false),
        }
    }

    async fn get_columns_info(&self, table: &str) -> Result<Vec<DBColumnInfo>> {
        let rows = self
            .conn()?
            .query(COLUMNS_INFO_SQL, &[DatabaseValue::from(table)])
            .await?;

        rows.iter()
            .map(|row| {
                let nullable = row.try_get_i64("nullable")?.unwrap_or(0) != 0;
                DBColumnInfo::from_row(row.as_ref(), nullable)
            })
            .collect()
    }

    async fn create_table(&self, table: &str, fields: &[FieldDescriptor]) -> Result<()> {
        let script = self.create_table_script(table, fields);
        debug!(sql = %script, "create table");
        self.conn()?.execute_script(&script).await?;
        info!(table, columns = fields.len(), "table created");
        Ok(())
    }

    async fn alter_table(&self, table: &str, fields: &[&FieldDescriptor]) -> Result<()> {
        let conn = self.conn()?;
        for stmt in self.alter_table_statements(table, fields) {
            debug!(sql = %stmt, "alter table");
            conn.execute_script(&stmt).await?;
        }
        if !fields.is_empty() {
            info!(
                table,
                columns = ?fields.iter().map(|f| f.db_name.as_str()).collect::<Vec<_>>(),
                "columns added"
            );
        }
        Ok(())
    }

    async fn migrate(&self, migrations_path: &Path) -> Result<()> {
        let dir = migrations_path.join(self.params.db_name());
        self.conn()?
            .run_migrations(&dir)
            .await
            .map_err(|source| Error::Migration {
                database: self.params.name.clone(),
                source,
            })?;
        info!(database = %self.params.name, dir = %dir.display(), "data migrations applied");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>> {
        Ok(self.conn()?.begin_transaction().await?)
    }

    async fn select(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<Box<dyn DatabaseRow>>> {
        let stmt = Statement {
            sql: query.compile()?,
            args: args.to_vec(),
        };
        run_query(self.conn()?, tx, &stmt).await
    }

    async fn get(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<Box<dyn DatabaseRow>>> {
        let stmt = Statement {
            sql: single_row(query)?,
            args: args.to_vec(),
        };
        run_query_one(self.conn()?, tx, &stmt).await
    }

    async fn insert(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        prepared: &PreparedData,
        table: &str,
        ext: Option<&InsertExt>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let stmt = self.insert_statement(prepared, table, ext, args)?;

        let Some(returning) = ext.and_then(|e| e.returning.as_ref()) else {
            return run_write(self.conn()?, tx, &stmt, false).await;
        };

        // LAST_INSERT_ID is per connection, so the INSERT and the read must share one
        if let Some(tx) = tx {
            return self.insert_returning_id(tx, &stmt, returning).await;
        }

        let mut own = self.conn()?.begin_transaction().await?;
        match self.insert_returning_id(&mut own, &stmt, returning).await {
            Ok(outcome) => {
                own.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = own.rollback().await {
                    warn!(error = %rollback, "rollback after failed insert failed");
                }
                Err(err)
            }
        }
    }

    async fn update(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        prepared: &PreparedData,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let stmt = self.update_statement(prepared, table, where_clause, returning, args)?;
        run_write(self.conn()?, tx, &stmt, false).await
    }

    async fn delete(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let stmt = self.delete_statement(table, where_clause, returning, args)?;
        run_write(self.conn()?, tx, &stmt, false).await
    }
}
