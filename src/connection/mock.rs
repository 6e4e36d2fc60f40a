//! In-memory stand-in for a pooled connection.
//!
//! Every statement handed to the mock is recorded together with its bound
//! parameters, so tests can assert the exact SQL text and bind order the
//! dialect engines produce without a live server.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::connection::{
    DatabaseConnection, DatabaseError, DatabaseResult, DatabaseRow, DatabaseTransaction,
    DatabaseValue,
};

/// A statement observed by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

/// Canned row answered by the mock
#[derive(Debug, Clone, Default)]
pub struct ValueRow {
    values: HashMap<String, DatabaseValue>,
}

impl ValueRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    fn lookup(&self, column: &str) -> DatabaseResult<&DatabaseValue> {
        self.values
            .get(column)
            .ok_or_else(|| DatabaseError::Decode(format!("no column {column}")))
    }

    fn mismatch(column: &str, value: &DatabaseValue) -> DatabaseError {
        DatabaseError::Decode(format!("column {column} holds {value:?}"))
    }
}

impl DatabaseRow for ValueRow {
    fn get_string(&self, column: &str) -> DatabaseResult<String> {
        match self.lookup(column)? {
            DatabaseValue::Text(s) => Ok(s.clone()),
            other => Err(Self::mismatch(column, other)),
        }
    }

    fn get_i64(&self, column: &str) -> DatabaseResult<i64> {
        match self.lookup(column)? {
            DatabaseValue::Integer(i) => Ok(*i),
            other => Err(Self::mismatch(column, other)),
        }
    }

    fn get_f64(&self, column: &str) -> DatabaseResult<f64> {
        match self.lookup(column)? {
            DatabaseValue::Float(f) => Ok(*f),
            other => Err(Self::mismatch(column, other)),
        }
    }

    fn get_bool(&self, column: &str) -> DatabaseResult<bool> {
        match self.lookup(column)? {
            DatabaseValue::Boolean(b) => Ok(*b),
            DatabaseValue::Integer(i) => Ok(*i != 0),
            other => Err(Self::mismatch(column, other)),
        }
    }

    fn get_bytes(&self, column: &str) -> DatabaseResult<Vec<u8>> {
        match self.lookup(column)? {
            DatabaseValue::Blob(b) => Ok(b.clone()),
            other => Err(Self::mismatch(column, other)),
        }
    }

    fn try_get_string(&self, column: &str) -> DatabaseResult<Option<String>> {
        match self.values.get(column) {
            None | Some(DatabaseValue::Null) => Ok(None),
            Some(_) => self.get_string(column).map(Some),
        }
    }

    fn try_get_i64(&self, column: &str) -> DatabaseResult<Option<i64>> {
        match self.values.get(column) {
            None | Some(DatabaseValue::Null) => Ok(None),
            Some(_) => self.get_i64(column).map(Some),
        }
    }

    fn try_get_f64(&self, column: &str) -> DatabaseResult<Option<f64>> {
        match self.values.get(column) {
            None | Some(DatabaseValue::Null) => Ok(None),
            Some(_) => self.get_f64(column).map(Some),
        }
    }

    fn try_get_bool(&self, column: &str) -> DatabaseResult<Option<bool>> {
        match self.values.get(column) {
            None | Some(DatabaseValue::Null) => Ok(None),
            Some(_) => self.get_bool(column).map(Some),
        }
    }

    fn try_get_bytes(&self, column: &str) -> DatabaseResult<Option<Vec<u8>>> {
        match self.values.get(column) {
            None | Some(DatabaseValue::Null) => Ok(None),
            Some(_) => self.get_bytes(column).map(Some),
        }
    }
}

#[derive(Default)]
struct MockState {
    log: Vec<Recorded>,
    rules: Vec<(String, Vec<ValueRow>)>,
    failures: Vec<String>,
    migrations: Vec<PathBuf>,
    closed: bool,
}

impl MockState {
    fn record(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<()> {
        self.log.push(Recorded {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match self.failures.iter().find(|p| sql.contains(p.as_str())) {
            Some(pattern) => Err(DatabaseError::Query(format!(
                "injected failure on '{pattern}'"
            ))),
            None => Ok(()),
        }
    }

    fn rows_for(&self, sql: &str) -> Vec<ValueRow> {
        self.rules
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

/// Recording connection used by unit tests
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every query whose text contains `pattern` with `rows`
    pub fn respond(&self, pattern: &str, rows: Vec<ValueRow>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .rules
            .push((pattern.to_string(), rows));
        self
    }

    /// Fail every statement whose text contains `pattern`
    pub fn fail_on(&self, pattern: &str) -> &Self {
        self.state.lock().unwrap().failures.push(pattern.to_string());
        self
    }

    pub fn statements(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|r| r.sql).collect()
    }

    pub fn last(&self) -> Option<Recorded> {
        self.state.lock().unwrap().log.last().cloned()
    }

    pub fn migrations(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().migrations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().log.clear();
    }

    fn execute_inner(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        self.state.lock().unwrap().record(sql, params)?;
        Ok(1)
    }

    fn query_inner(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<ValueRow>> {
        let mut state = self.state.lock().unwrap();
        state.record(sql, params)?;
        Ok(state.rows_for(sql))
    }
}

fn boxed(rows: Vec<ValueRow>) -> Vec<Box<dyn DatabaseRow>> {
    rows.into_iter()
        .map(|r| Box::new(r) as Box<dyn DatabaseRow>)
        .collect()
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn execute(&self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        self.execute_inner(query, params)
    }

    async fn query(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        self.query_inner(query, params).map(boxed)
    }

    async fn query_one(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        Ok(boxed(self.query_inner(query, params)?).into_iter().next())
    }

    async fn execute_script(&self, script: &str) -> DatabaseResult<()> {
        self.execute_inner(script, &[]).map(|_| ())
    }

    async fn run_migrations(&self, dir: &Path) -> DatabaseResult<()> {
        self.state
            .lock()
            .unwrap()
            .migrations
            .push(dir.to_path_buf());
        Ok(())
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        self.execute_inner("BEGIN", &[])?;
        Ok(Box::new(MockTransaction { conn: self.clone() }))
    }

    async fn ping(&self) -> DatabaseResult<()> {
        self.execute_inner("SELECT 1", &[]).map(|_| ())
    }

    async fn close(&self) -> DatabaseResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Transaction over the same recording log as its connection
pub struct MockTransaction {
    conn: MockConnection,
}

#[async_trait]
impl DatabaseTransaction for MockTransaction {
    async fn execute(&mut self, query: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        self.conn.execute_inner(query, params)
    }

    async fn query(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        self.conn.query_inner(query, params).map(boxed)
    }

    async fn query_one(
        &mut self,
        query: &str,
        params: &[DatabaseValue],
    ) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        Ok(boxed(self.conn.query_inner(query, params)?).into_iter().next())
    }

    async fn commit(self: Box<Self>) -> DatabaseResult<()> {
        self.conn.execute_inner("COMMIT", &[]).map(|_| ())
    }

    async fn rollback(self: Box<Self>) -> DatabaseResult<()> {
        self.conn.execute_inner("ROLLBACK", &[]).map(|_| ())
    }
}
