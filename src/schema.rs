//! Table-bound CRUD over a master engine and an optional read replica.

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::sync::Arc;

use crate::connection::{DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::dialect::{Database, InsertExt, Payload, PreparedData, Returning, WriteOutcome};
use crate::field::{extract_fields, FieldDescriptor, Model, ModelDescription};
use crate::query::Query;
use crate::{Error, Result};

/// Everything needed to build a [`Schema`]
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaParams {
    pub name: String,
    /// Logical name of the master database
    pub database_name: String,
    /// Logical name of a read replica
    #[serde(default)]
    pub slave_database_name: Option<String>,
    /// Defaults to the schema name
    #[serde(default)]
    pub table_name: String,
    pub model: ModelDescription,
}

impl SchemaParams {
    pub fn new(
        name: impl Into<String>,
        database_name: impl Into<String>,
        table_name: impl Into<String>,
        model: ModelDescription,
    ) -> Self {
        Self {
            name: name.into(),
            database_name: database_name.into(),
            slave_database_name: None,
            table_name: table_name.into(),
            model,
        }
    }

    pub fn for_model<M: Model>(
        name: impl Into<String>,
        database_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self::new(name, database_name, table_name, M::describe())
    }

    pub fn with_slave(mut self, database_name: impl Into<String>) -> Self {
        self.slave_database_name = Some(database_name.into());
        self
    }
}

/// Build a value from one result row
pub trait FromRow: Sized {
    fn from_row(row: &dyn DatabaseRow) -> Result<Self>;
}

struct Engines {
    master: Arc<dyn Database>,
    slave: Option<Arc<dyn Database>>,
}

/// A table with its column descriptors and bound engines
pub struct Schema {
    name: String,
    database_name: String,
    slave_database_name: Option<String>,
    table_name: String,
    fields: Vec<FieldDescriptor>,
    engines: OnceCell<Engines>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("database_name", &self.database_name)
            .field("slave_database_name", &self.slave_database_name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields.len())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Schema {
    pub fn new(params: SchemaParams) -> Result<Self> {
        let name = params.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::EmptySchemaName);
        }
        let fields = extract_fields(&params.model)?;
        let table_name = if params.table_name.trim().is_empty() {
            name.clone()
        } else {
            params.table_name
        };

        Ok(Self {
            name,
            database_name: params.database_name,
            slave_database_name: params.slave_database_name,
            table_name,
            fields,
            engines: OnceCell::new(),
        })
    }

    pub fn for_model<M: Model>(
        name: impl Into<String>,
        database_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<Self> {
        Self::new(SchemaParams::for_model::<M>(name, database_name, table_name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn slave_database_name(&self) -> Option<&str> {
        self.slave_database_name.as_deref()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Column descriptors in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn is_bound(&self) -> bool {
        self.engines.get().is_some()
    }

    /// Attach the engines. A schema is bound once.
    pub fn bind(&self, master: Arc<dyn Database>, slave: Option<Arc<dyn Database>>) -> Result<()> {
        self.engines
            .set(Engines { master, slave })
            .map_err(|_| Error::Config(format!("schema '{}' is already bound", self.name)))
    }

    fn engines(&self) -> Result<&Engines> {
        self.engines
            .get()
            .ok_or_else(|| Error::SchemaNotBound(self.name.clone()))
    }

    pub fn master(&self) -> Result<&dyn Database> {
        Ok(self.engines()?.master.as_ref())
    }

    /// Engine serving reads outside a transaction
    fn reader(&self) -> Result<&dyn Database> {
        let engines = self.engines()?;
        Ok(engines.slave.as_ref().unwrap_or(&engines.master).as_ref())
    }

    pub async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>> {
        self.master()?.begin_transaction().await
    }

    pub async fn select(
        &self,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<Box<dyn DatabaseRow>>> {
        self.fetch(None, query, args).await
    }

    pub async fn select_tx(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<Box<dyn DatabaseRow>>> {
        self.fetch(Some(tx), query, args).await
    }

    /// First matching row; the query runs with `LIMIT 1`
    pub async fn select_one(
        &self,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<Box<dyn DatabaseRow>>> {
        self.fetch_one(None, query, args).await
    }

    pub async fn select_one_tx(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<Box<dyn DatabaseRow>>> {
        self.fetch_one(Some(tx), query, args).await
    }

    pub async fn select_as<T: FromRow>(
        &self,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<T>> {
        let rows = self.select(query, args).await?;
        rows.iter().map(|row| T::from_row(row.as_ref())).collect()
    }

    pub async fn select_as_tx<T: FromRow>(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<T>> {
        let rows = self.select_tx(tx, query, args).await?;
        rows.iter().map(|row| T::from_row(row.as_ref())).collect()
    }

    pub async fn select_one_as<T: FromRow>(
        &self,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<T>> {
        match self.select_one(query, args).await? {
            Some(row) => T::from_row(row.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    pub async fn select_one_as_tx<T: FromRow>(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<T>> {
        match self.select_one_tx(tx, query, args).await? {
            Some(row) => T::from_row(row.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    pub async fn insert(
        &self,
        payload: &Payload,
        ext: Option<&InsertExt>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let prepared = self.prepare(payload);
        self.master()?
            .insert(None, &prepared, &self.table_name, ext, args)
            .await
    }

    pub async fn insert_tx(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        payload: &Payload,
        ext: Option<&InsertExt>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let prepared = self.prepare(payload);
        self.master()?
            .insert(Some(tx), &prepared, &self.table_name, ext, args)
            .await
    }

    /// Update the rows matching `where_clause`; pass `1=1` to touch every row
    pub async fn update(
        &self,
        payload: &Payload,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let prepared = self.prepare(payload);
        self.master()?
            .update(None, &prepared, &self.table_name, where_clause, returning, args)
            .await
    }

    pub async fn update_tx(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        payload: &Payload,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        let prepared = self.prepare(payload);
        self.master()?
            .update(Some(tx), &prepared, &self.table_name, where_clause, returning, args)
            .await
    }

    pub async fn delete(
        &self,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        self.master()?
            .delete(None, &self.table_name, where_clause, returning, args)
            .await
    }

    pub async fn delete_tx(
        &self,
        tx: &mut Box<dyn DatabaseTransaction>,
        where_clause: &str,
        returning: Option<&Returning>,
        args: &[DatabaseValue],
    ) -> Result<WriteOutcome> {
        self.master()?
            .delete(Some(tx), &self.table_name, where_clause, returning, args)
            .await
    }

    fn prepare(&self, payload: &Payload) -> PreparedData {
        PreparedData::prepare(payload, &self.fields)
    }

    // a transaction belongs to the master, so reads inside one go there too
    async fn fetch(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Vec<Box<dyn DatabaseRow>>> {
        let query = query.clone().with_defaults(&self.table_name);
        let db = if tx.is_some() {
            self.master()?
        } else {
            self.reader()?
        };
        db.select(tx, &query, args).await
    }

    async fn fetch_one(
        &self,
        tx: Option<&mut Box<dyn DatabaseTransaction>>,
        query: &Query,
        args: &[DatabaseValue],
    ) -> Result<Option<Box<dyn DatabaseRow>>> {
        let query = query.clone().with_defaults(&self.table_name);
        let db = if tx.is_some() {
            self.master()?
        } else {
            self.reader()?
        };
        db.get(tx, &query, args).await
    }
}
