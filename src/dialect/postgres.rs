use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{
    connect_once, quote_literal, run_query, run_query_one, run_write, single_row, Capabilities,
    ConflictStrategy, DBColumnInfo, Database, DatabaseParams, Dialect, InsertExt, PreparedData,
    Returning, ReturningSupport, Statement, WriteOutcome,
};
use crate::connection::{DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::field::FieldDescriptor;
use crate::query::Query;
use crate::{Error, Result};

const TABLE_EXISTS_SQL: &str = r#"SELECT EXISTS (SELECT t.table_name FROM information_schema."tables" t WHERE t.table_name = $1) AS "exists""#;

const COLUMNS_INFO_SQL: &str = r#"SELECT c.column_name::text AS "name", c.udt_name::text AS "type", (CASE c.is_nullable WHEN 'YES' THEN true WHEN 'NO' THEN false END) AS "nullable", COALESCE(c.character_maximum_length, c.numeric_precision, 0)::bigint AS "length", c.column_default::text AS "default" FROM information_schema."columns" c WHERE c.table_name = $1"#;

/// PostgreSQL dialect engine
pub struct PostgresDatabase {
    params: DatabaseParams,
    conn: OnceCell<Arc<dyn DatabaseConnection>>,
}

impl PostgresDatabase {
    pub fn new(params: DatabaseParams) -> Self {
        Self {
            params,
            conn: OnceCell::new(),
        }
    }

    /// Engine over an already opened connection
    pub fn with_connection(params: DatabaseParams, conn: Arc<dyn DatabaseConnection>) -> Self {
        Self {
            params,
            conn: OnceCell::new_with(Some(conn)),
        }
    }

    fn conn(&self) -> Result<&dyn DatabaseConnection> {
        self.conn
            .get()
            .map(|c| &**c)
            .ok_or_else(|| Error::NotConnected(self.params.name.clone()))
    }

    #[cfg(feature = "postgres")]
    async fn open_pool(&self) -> Result<Arc<dyn DatabaseConnection>> {
        use secrecy::ExposeSecret;

        let conn = crate::connection::PostgresConnection::connect(
            self.params.connection_string.expose_secret(),
            self.params.max_open_conns,
        )
        .await?;
        Ok(Arc::new(conn))
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_pool(&self) -> Result<Arc<dyn DatabaseConnection>> {
        Err(Error::Config(format!(
            "database '{}' needs the `postgres` feature",
            self.params.name
        )))
    }

    fn column_definition(&self, table: &str, field: &FieldDescriptor) -> String {
        if field.is_unsigned() {
            warn!(
                table,
                column = %field.db_name,
                "PostgreSQL has no unsigned types, qualifier dropped"
            );
        }

        let mut sql = format!("{} {}", quote_ident(&field.db_name), field.base_type());
        if field.length > 0 {
            sql.push_str(&format!("({})", field.length));
        }
        sql.push_str(if field.nullable { " NULL" } else { " NOT NULL" });
        if !field.default.is_empty() {
            sql.push_str(" DEFAULT ");
            sql.push_str(&field.default);
        }
        sql
    }

    /// `COMMENT ON COLUMN` statements for fields carrying a comment
    fn comment_statements<'a>(
        &self,
        table: &str,
        fields: impl IntoIterator<Item = &'a FieldDescriptor>,
    ) -> String {
        fields
            .into_iter()
            .filter(|f| !f.comment.is_empty())
            .map(|f| {
                format!(
                    "\nCOMMENT ON COLUMN {}.{} IS {};",
                    table,
                    quote_ident(&f.db_name),
                    quote_literal(&f.comment)
                )
            })
            .collect()
    }

    pub(crate) fn create_table_script(&self, table: &str, fields: &[FieldDescriptor]) -> String {
        let mut lines: Vec<String> = fields
            .iter()
            .map(|f| self.column_definition(table, f))
            .collect();

        let pks: Vec<String> = fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| quote_ident(&f.db_name))
            .collect();
        if !pks.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", pks.join(", ")));
        }

        format!(
            "CREATE TABLE {} (\n{}\n);{}",
            table,
            lines.join(",\n"),
            self.comment_statements(table, fields)
        )
    }

    pub(crate) fn alter_table_script(&self, table: &str, fields: &[&FieldDescriptor]) -> String {
        let columns: Vec<String> = fields
            .iter()
            .map(|f| format!("ADD COLUMN {}", self.column_definition(table, f)))
            .collect();

        format!(
            "ALTER TABLE {} {};{}",
            table,
            columns.join(", "),
            self.comment_statements(table, fields.iter().copied())
        )
    }

    /// INSERT with caller args bound first and values numbered after them
    pub(crate) fn insert_statement(
        &self,
        prepared: &PreparedData,
        table: &str,
        ext: Option<&InsertExt>,
        args: &[DatabaseValue],
    ) -> Result<Statement> {
        if prepared.is_empty() {
            return Err(Error::EmptyPayload {
                table: table.to_string(),
            });
        }

        let mut all_args = args.to_vec();
        let mut sql = format!("INSERT INTO {table}");

        let columns = target_columns(prepared);
        if !columns.is_empty() {
            sql.push_str(&format!(" ({})", columns.join(", ")));
        }

        if let Some(source) = &prepared.source {
            sql.push(' ');
            sql.push_str(&source.compile()?);
        } else {
            let mut values = Vec::with_capacity(columns.len());
            for value in &prepared.values {
                all_args.push(value.clone());
                values.push(format!("${}", all_args.len()));
            }
            for (_, query) in &prepared.subqueries {
                values.push(format!("({})", query.compile()?));
            }

            match ext.and_then(|e| e.where_not_exists.as_deref()) {
                Some(predicate) if !predicate.is_empty() => sql.push_str(&format!(
                    " SELECT {} WHERE NOT EXISTS (SELECT * FROM {} WHERE {})",
                    values.join(", "),
                    table,
                    predicate
                )),
                _ => sql.push_str(&format!(" VALUES ({})", values.join(", "))),
            }
        }

        if let Some(conflict) = ext.and_then(|e| e.on_conflict.as_ref()) {
            match &conflict.strategy {
                ConflictStrategy::DoNothing if conflict.object.is_empty() => {
                    sql.push_str(" ON CONFLICT DO NOTHING")
                }
                ConflictStrategy::DoNothing => {
                    sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", conflict.object))
                }
                ConflictStrategy::DoUpdate(assignments) => {
                    return Err(Error::UnsupportedConflictStrategy(format!(
                        "DO UPDATE SET {assignments}"
                    )))
                }
            }
        }

        if let Some(returning) = ext.and_then(|e| e.returning.as_ref()) {
            returning.validate()?;
            sql.push_str(&format!(" RETURNING {}", returning.list));
        }

        Ok(Statement {
            sql,
            args: all_args,
        })
    }

    /// UPDATE with WHERE args bound first and SET values numbered after them
    pub(crate) fn update_statement(
        &self,
        prepared: &PreparedData,
        table: &str,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<Statement> {
        if prepared.columns.is_empty() && prepared.subqueries.is_empty() {
            return Err(Error::EmptyPayload {
                table: table.to_string(),
            });
        }

        let mut all_args = args.to_vec();
        let mut sets = Vec::with_capacity(prepared.columns.len() + prepared.subqueries.len());
        for (column, value) in prepared.columns.iter().zip(&prepared.values) {
            all_args.push(value.clone());
            sets.push(format!("{} = ${}", quote_ident(column), all_args.len()));
        }
        for (column, query) in &prepared.subqueries {
            sets.push(format!("{} = ({})", quote_ident(column), query.compile()?));
        }

        let mut sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            sets.join(", "),
            where_clause
        );
        if let Some(returning) = returning {
            returning.validate()?;
            sql.push_str(&format!(" RETURNING {}", returning.list));
        }

        Ok(Statement {
            sql,
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
        let mut sql = format!("DELETE FROM {table} WHERE {where_clause}");
        if let Some(returning) = returning {
            returning.validate()?;
            sql.push_str(&format!(" RETURNING {}", returning.list));
        }

        Ok(Statement {
            sql,
            args: args.to_vec(),
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted INSERT target columns: plain values first, then sub-queries
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
impl Database for PostgresDatabase {
    fn params(&self) -> &DatabaseParams {
        &self.params
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            returning: ReturningSupport::Full,
            on_conflict: true,
            batched_alter: true,
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
            Some(row) => row.get_bool("exists").map_err(catalog),
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
                let nullable = row.try_get_bool("nullable")?.unwrap_or(false);
                DBColumnInfo::from_row(row.as_ref(), nullable)
            })
            .collect()
    }

    async fn create_table(&self, table: &str, fields: &[FieldDescriptor]) -> Result<()> {
        let script = self.create_table_script(table, fields);
        tracing::debug!(sql = %script, "create table");
        self.conn()?.execute_script(&script).await?;
        info!(table, columns = fields.len(), "table created");
        Ok(())
    }

    async fn alter_table(&self, table: &str, fields: &[&FieldDescriptor]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let script = self.alter_table_script(table, fields);
        tracing::debug!(sql = %script, "alter table");
        self.conn()?.execute_script(&script).await?;
        info!(
            table,
            columns = ?fields.iter().map(|f| f.db_name.as_str()).collect::<Vec<_>>(),
            "columns added"
        );
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
        let returning = ext.map_or(false, |e| e.returning.is_some());
        run_write(self.conn()?, tx, &stmt, returning).await
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
        run_write(self.conn()?, tx, &stmt, returning.is_some()).await
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
        run_write(self.conn()?, tx, &stmt, returning.is_some()).await
    }
}
