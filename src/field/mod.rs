//! Column descriptors derived from annotated model descriptions.
//!
//! A model is described as an ordered list of fields, each carrying a
//! structural [`FieldKind`] and a set of string annotations:
//!
//! | key       | meaning                                                    |
//! |-----------|------------------------------------------------------------|
//! | `db`      | column name, `name,nomigrate` to skip ALTER, `-` to ignore |
//! | `type`    | column type, `type,unsigned` for unsigned MySQL numerics   |
//! | `len`     | type length, e.g. `255` for `varchar(255)`                 |
//! | `def`     | default value literal                                      |
//! | `comment` | column comment                                             |
//! | `key`     | comma list, `pk` marks the primary key                     |
//!
//! Descriptions usually come from the [`model!`](crate::model) macro but can
//! be built by hand or deserialized from configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::connection::DatabaseValue;
use crate::{Error, Result};

/// Structural kind of a model field, used to infer nullability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Plain value, NOT NULL
    Value,
    /// Optional value
    Optional,
    /// Keyed mapping
    Map,
    /// Fully dynamic value
    Dynamic,
}

impl FieldKind {
    pub fn is_nullable(self) -> bool {
        !matches!(self, FieldKind::Value)
    }
}

/// Column annotations of one model field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotations(BTreeMap<String, String>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Annotation value, empty when absent
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }
}

/// One field of a model description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub annotations: Annotations,
}

impl ModelField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            annotations: Annotations::new(),
        }
    }

    pub fn annotate(mut self, key: &str, value: impl ToString) -> Self {
        self.annotations = self.annotations.with(key, value);
        self
    }
}

/// Ordered, annotated description of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    pub fields: Vec<ModelField>,
}

impl ModelDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: ModelField) -> Self {
        self.fields.push(field);
        self
    }
}

/// Column metadata derived from one model field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name in the model
    pub name: String,
    /// Column name in the database
    pub db_name: String,
    /// Column type as annotated, possibly `type,unsigned`
    pub db_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub length: u32,
    pub default: String,
    pub comment: String,
    /// Whether the column takes part in ALTER TABLE
    pub migratable: bool,
}

impl FieldDescriptor {
    /// Column type without qualifiers
    pub fn base_type(&self) -> &str {
        self.db_type
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
    }

    /// Whether the type carries the `unsigned` qualifier
    pub fn is_unsigned(&self) -> bool {
        self.db_type
            .split(',')
            .skip(1)
            .any(|q| q.trim().eq_ignore_ascii_case("unsigned"))
    }

    /// Find a descriptor by its column name
    pub fn find_by_db_name<'a>(
        fields: &'a [FieldDescriptor],
        db_name: &str,
    ) -> Option<&'a FieldDescriptor> {
        fields.iter().find(|f| f.db_name == db_name)
    }
}

/// Derive the column descriptors of a model.
///
/// Fields without a `db` annotation, or annotated `-`, are skipped. The
/// output follows declaration order, which is also the CREATE TABLE column
/// order.
pub fn extract_fields(model: &ModelDescription) -> Result<Vec<FieldDescriptor>> {
    let mut fields = Vec::with_capacity(model.fields.len());

    for field in &model.fields {
        let ann = &field.annotations;

        let db = ann.get("db");
        let mut db_parts = db.split(',');
        let db_name = db_parts.next().unwrap_or_default().trim();
        if db_name.is_empty() || db_name == "-" {
            continue;
        }
        let migratable = db_parts.next().map(str::trim) != Some("nomigrate");

        let db_type = ann.get("type").trim();
        if db_type.is_empty() {
            return Err(Error::MissingColumnType {
                field: field.name.clone(),
            });
        }

        let len = ann.get("len").trim();
        let length = if len.is_empty() {
            0
        } else {
            len.parse::<u32>().map_err(|_| Error::InvalidLength {
                field: field.name.clone(),
                value: len.to_string(),
            })?
        };

        let primary_key = ann.get("key").split(',').any(|k| k.trim() == "pk");
        let nullable = field.kind.is_nullable();
        if primary_key && nullable {
            return Err(Error::InvalidPrimaryKey {
                field: field.name.clone(),
            });
        }

        fields.push(FieldDescriptor {
            name: field.name.clone(),
            db_name: db_name.to_string(),
            db_type: db_type.to_string(),
            nullable,
            primary_key,
            length,
            default: ann.get("def").to_string(),
            comment: ann.get("comment").to_string(),
            migratable,
        });
    }

    Ok(fields)
}

/// Runtime value of one field of a model instance
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: DatabaseValue,
    pub is_zero: bool,
}

/// A Rust type usable as a model field
pub trait SqlField {
    const KIND: FieldKind;

    fn to_value(&self) -> DatabaseValue;

    /// Zero values are left out of struct write payloads
    fn is_zero(&self) -> bool {
        self.to_value().is_zero()
    }
}

macro_rules! impl_sql_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SqlField for $ty {
                const KIND: FieldKind = FieldKind::Value;

                fn to_value(&self) -> DatabaseValue {
                    DatabaseValue::from(self.clone())
                }
            }
        )*
    };
}

impl_sql_field!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    String,
    Vec<u8>,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
);

impl SqlField for serde_json::Value {
    const KIND: FieldKind = FieldKind::Dynamic;

    fn to_value(&self) -> DatabaseValue {
        DatabaseValue::Json(self.clone())
    }
}

impl SqlField for DatabaseValue {
    const KIND: FieldKind = FieldKind::Dynamic;

    fn to_value(&self) -> DatabaseValue {
        self.clone()
    }
}

impl<T: SqlField> SqlField for Option<T> {
    const KIND: FieldKind = FieldKind::Optional;

    fn to_value(&self) -> DatabaseValue {
        self.as_ref().map_or(DatabaseValue::Null, SqlField::to_value)
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

fn map_to_json<M: Serialize>(map: &M) -> DatabaseValue {
    serde_json::to_value(map)
        .map(DatabaseValue::Json)
        .unwrap_or(DatabaseValue::Null)
}

impl<V: Serialize> SqlField for HashMap<String, V> {
    const KIND: FieldKind = FieldKind::Map;

    fn to_value(&self) -> DatabaseValue {
        map_to_json(self)
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<V: Serialize> SqlField for BTreeMap<String, V> {
    const KIND: FieldKind = FieldKind::Map;

    fn to_value(&self) -> DatabaseValue {
        map_to_json(self)
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// A type that describes its own columns
pub trait Model {
    fn describe() -> ModelDescription;

    fn values(&self) -> Vec<FieldValue>;
}
