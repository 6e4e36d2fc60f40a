use std::collections::HashMap;

use crate::connection::DatabaseValue;
use crate::field::{FieldDescriptor, FieldValue, Model};
use crate::query::Query;

/// Value written to one column
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Value(DatabaseValue),
    /// Column computed by a nested SELECT
    Subquery(Query),
}

impl From<DatabaseValue> for Assignment {
    fn from(value: DatabaseValue) -> Self {
        Assignment::Value(value)
    }
}

impl From<Query> for Assignment {
    fn from(query: Query) -> Self {
        Assignment::Subquery(query)
    }
}

/// Caller supplied data for an INSERT or UPDATE
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Keyed by column name or model field name
    Map(HashMap<String, Assignment>),
    /// Field values of a model instance; zero values are skipped
    Struct(Vec<FieldValue>),
    /// Whole-row source for `INSERT ... SELECT`
    Query(Query),
}

impl Payload {
    /// Empty keyed payload, filled with [`Payload::set`]
    pub fn values() -> Self {
        Payload::Map(HashMap::new())
    }

    pub fn model<M: Model>(model: &M) -> Self {
        Payload::Struct(model.values())
    }

    /// Set a column value. A non-map payload is replaced by a map.
    pub fn set(self, key: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.assign(key.into(), Assignment::Value(value.into()))
    }

    /// Set a column to the result of a sub-query
    pub fn set_subquery(self, key: impl Into<String>, query: Query) -> Self {
        self.assign(key.into(), Assignment::Subquery(query))
    }

    fn assign(self, key: String, assignment: Assignment) -> Self {
        let mut map = match self {
            Payload::Map(map) => map,
            _ => HashMap::new(),
        };
        map.insert(key, assignment);
        Payload::Map(map)
    }
}

impl From<Query> for Payload {
    fn from(query: Query) -> Self {
        Payload::Query(query)
    }
}

/// Column/value lists compiled from a [`Payload`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedData {
    /// Column names, parallel to `values`
    pub columns: Vec<String>,
    pub values: Vec<DatabaseValue>,
    /// Columns whose value is a nested SELECT
    pub subqueries: Vec<(String, Query)>,
    /// Whole-row source for `INSERT ... SELECT`
    pub source: Option<Query>,
}

impl PreparedData {
    /// Match a payload against the schema's columns.
    ///
    /// Only keys naming a known column survive; columns come out in field
    /// declaration order.
    pub fn prepare(payload: &Payload, fields: &[FieldDescriptor]) -> Self {
        let mut prepared = PreparedData::default();

        match payload {
            Payload::Map(map) => {
                for field in fields {
                    let assignment = map.get(&field.db_name).or_else(|| map.get(&field.name));
                    match assignment {
                        Some(Assignment::Value(value)) => {
                            prepared.columns.push(field.db_name.clone());
                            prepared.values.push(value.clone());
                        }
                        Some(Assignment::Subquery(query)) => {
                            prepared
                                .subqueries
                                .push((field.db_name.clone(), query.clone()));
                        }
                        None => {}
                    }
                }
            }
            Payload::Struct(values) => {
                for field in fields {
                    let value = values
                        .iter()
                        .find(|v| v.name == field.name || v.name == field.db_name);
                    if let Some(value) = value.filter(|v| !v.is_zero) {
                        prepared.columns.push(field.db_name.clone());
                        prepared.values.push(value.value.clone());
                    }
                }
            }
            Payload::Query(query) => prepared.source = Some(query.clone()),
        }

        prepared
    }

    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.subqueries.is_empty() && self.source.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{extract_fields, FieldKind, ModelDescription, ModelField};

    fn fields() -> Vec<FieldDescriptor> {
        let model = ModelDescription::new("User")
            .field(
                ModelField::new("id", FieldKind::Value)
                    .annotate("db", "id")
                    .annotate("type", "bigint")
                    .annotate("key", "pk"),
            )
            .field(
                ModelField::new("full_name", FieldKind::Value)
                    .annotate("db", "name")
                    .annotate("type", "text"),
            )
            .field(
                ModelField::new("rank", FieldKind::Optional)
                    .annotate("db", "rank")
                    .annotate("type", "int"),
            );
        extract_fields(&model).unwrap()
    }

    #[test]
    fn test_prepare_map() {
        let payload = Payload::values()
            .set("rank", 3)
            .set("full_name", "Ada")
            .set("unknown", true)
            .set_subquery("id", Query::new().select("max(id) + 1").from("users"));

        let prepared = PreparedData::prepare(&payload, &fields());
        assert_eq!(prepared.columns, vec!["name", "rank"]);
        assert_eq!(
            prepared.values,
            vec![DatabaseValue::Text("Ada".into()), DatabaseValue::Integer(3)]
        );
        assert_eq!(prepared.subqueries.len(), 1);
        assert_eq!(prepared.subqueries[0].0, "id");
        assert!(prepared.source.is_none());
    }

    #[test]
    fn test_prepare_struct_skips_zero() {
        let payload = Payload::Struct(vec![
            FieldValue {
                name: "id".into(),
                value: DatabaseValue::Integer(0),
                is_zero: true,
            },
            FieldValue {
                name: "full_name".into(),
                value: DatabaseValue::Text("Ada".into()),
                is_zero: false,
            },
            FieldValue {
                name: "rank".into(),
                value: DatabaseValue::Integer(0),
                is_zero: false,
            },
        ]);

        let prepared = PreparedData::prepare(&payload, &fields());
        assert_eq!(prepared.columns, vec!["name", "rank"]);
        assert_eq!(prepared.values[1], DatabaseValue::Integer(0));
    }

    #[test]
    fn test_prepare_query_source() {
        let payload = Payload::from(Query::new().from("staging"));
        let prepared = PreparedData::prepare(&payload, &fields());
        assert!(prepared.columns.is_empty());
        assert!(prepared.source.is_some());
        assert!(!prepared.is_empty());

        assert!(PreparedData::prepare(&Payload::values(), &fields()).is_empty());
    }
}
