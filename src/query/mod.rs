//! Dialect-neutral SELECT tree and its compiler.
//!
//! Placeholders inside predicate text are written by the caller in the
//! target dialect's syntax; the compiler only assembles clauses.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A named sub-query, used in WITH lists and as a FROM target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasedQuery {
    pub alias: String,
    pub query: Box<Query>,
}

impl AliasedQuery {
    pub fn new(alias: impl Into<String>, query: Query) -> Self {
        Self {
            alias: alias.into(),
            query: Box::new(query),
        }
    }

    fn compile(&self, clause: &'static str) -> Result<(String, &str)> {
        if self.alias.trim().is_empty() {
            return Err(Error::MissingAlias { clause });
        }
        Ok((self.query.compile()?, self.alias.as_str()))
    }
}

/// Target of the FROM clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FromClause {
    Table(String),
    Subquery(AliasedQuery),
}

/// Next link of a UNION chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionClause {
    pub all: bool,
    pub query: Query,
}

/// A SELECT statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub with: Vec<AliasedQuery>,
    pub union: Option<Box<UnionClause>>,
    pub select: String,
    pub from: Option<FromClause>,
    pub join: String,
    pub where_clause: String,
    pub group_by: String,
    pub having: String,
    pub order_by: String,
    pub limit: u64,
    pub offset: u64,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, projection: impl Into<String>) -> Self {
        self.select = projection.into();
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from = Some(FromClause::Table(table.into()));
        self
    }

    pub fn from_subquery(mut self, alias: impl Into<String>, query: Query) -> Self {
        self.from = Some(FromClause::Subquery(AliasedQuery::new(alias, query)));
        self
    }

    pub fn with(mut self, alias: impl Into<String>, query: Query) -> Self {
        self.with.push(AliasedQuery::new(alias, query));
        self
    }

    pub fn join(mut self, join: impl Into<String>) -> Self {
        self.join = join.into();
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = predicate.into();
        self
    }

    pub fn group_by(mut self, columns: impl Into<String>) -> Self {
        self.group_by = columns.into();
        self
    }

    pub fn having(mut self, predicate: impl Into<String>) -> Self {
        self.having = predicate.into();
        self
    }

    pub fn order_by(mut self, columns: impl Into<String>) -> Self {
        self.order_by = columns.into();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Append `UNION <query>` to the end of the chain
    pub fn union(self, query: Query) -> Self {
        self.link(query, false)
    }

    /// Append `UNION ALL <query>` to the end of the chain
    pub fn union_all(self, query: Query) -> Self {
        self.link(query, true)
    }

    fn link(mut self, query: Query, all: bool) -> Self {
        self.append_union(UnionClause { all, query });
        self
    }

    fn append_union(&mut self, clause: UnionClause) {
        if let Some(next) = self.union.as_mut() {
            next.query.append_union(clause);
        } else {
            self.union = Some(Box::new(clause));
        }
    }

    /// Fill an empty projection with `*` and a missing FROM with `table`
    pub fn set_defaults(&mut self, table: &str) {
        if self.select.trim().is_empty() {
            self.select = "*".to_string();
        }
        if self.from.is_none() {
            self.from = Some(FromClause::Table(table.to_string()));
        }
    }

    pub fn with_defaults(mut self, table: &str) -> Self {
        self.set_defaults(table);
        self
    }

    /// Render the statement as a single line of SQL
    pub fn compile(&self) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();

        if !self.with.is_empty() {
            let entries = self
                .with
                .iter()
                .map(|entry| {
                    let (sql, alias) = entry.compile("WITH")?;
                    Ok(format!("{alias} AS ({sql})"))
                })
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("WITH {}", entries.join(", ")));
        }

        let projection = if self.select.trim().is_empty() {
            "*"
        } else {
            self.select.as_str()
        };
        parts.push(format!("SELECT {} FROM {}", projection, self.compile_from()?));

        if !self.join.is_empty() {
            parts.push(self.join.clone());
        }
        if !self.where_clause.is_empty() {
            parts.push(format!("WHERE {}", self.where_clause));
        }
        if !self.group_by.is_empty() {
            parts.push(format!("GROUP BY {}", self.group_by));
            if !self.having.is_empty() {
                parts.push(format!("HAVING {}", self.having));
            }
        }
        if !self.order_by.is_empty() {
            parts.push(format!("ORDER BY {}", self.order_by));
        }
        if self.limit > 0 {
            parts.push(format!("LIMIT {}", self.limit));
        }
        if self.offset > 0 {
            parts.push(format!("OFFSET {}", self.offset));
        }

        // the linked query compiles its own further links
        if let Some(link) = &self.union {
            parts.push(if link.all { "UNION ALL" } else { "UNION" }.to_string());
            parts.push(link.query.compile()?);
        }

        Ok(parts.join(" "))
    }

    fn compile_from(&self) -> Result<String> {
        match &self.from {
            Some(FromClause::Table(table)) if !table.trim().is_empty() => Ok(table.clone()),
            Some(FromClause::Table(_)) => {
                Err(Error::InvalidFromClause("table name is empty".to_string()))
            }
            Some(FromClause::Subquery(sub)) => {
                let (sql, alias) = sub.compile("FROM")?;
                Ok(format!("({sql}) AS {alias}"))
            }
            None => Err(Error::InvalidFromClause("no FROM target".to_string())),
        }
    }
}
