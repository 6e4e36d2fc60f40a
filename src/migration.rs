//! Additive schema synchronization.
//!
//! Tables are created when missing and gain columns for newly declared
//! fields. Live columns are never dropped, retyped or renamed, so a field
//! removed from a model stays in the table untouched.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::dialect::{DBColumnInfo, Database};
use crate::field::FieldDescriptor;
use crate::Result;

/// What [`migrate_schema`] did to a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The table did not exist and was created with every declared field
    Created,
    /// These columns were added
    Altered(Vec<String>),
    UpToDate,
}

/// Declared migratable fields whose column is missing from `live`.
///
/// Declaration order is preserved.
pub fn new_fields<'a>(
    declared: &'a [FieldDescriptor],
    live: &[DBColumnInfo],
) -> Vec<&'a FieldDescriptor> {
    let existing: HashSet<&str> = live.iter().map(|c| c.name.as_str()).collect();
    declared
        .iter()
        .filter(|f| f.migratable && !existing.contains(f.db_name.as_str()))
        .collect()
}

/// Bring `table` in line with `fields` on `db`
pub async fn migrate_schema(
    db: &dyn Database,
    table: &str,
    fields: &[FieldDescriptor],
) -> Result<MigrationOutcome> {
    if !db.is_table_exists(table).await? {
        db.create_table(table, fields).await?;
        return Ok(MigrationOutcome::Created);
    }

    let live = db.get_columns_info(table).await?;
    let missing = new_fields(fields, &live);
    if missing.is_empty() {
        debug!(table, "table is up to date");
        return Ok(MigrationOutcome::UpToDate);
    }

    db.alter_table(table, &missing).await?;
    let added: Vec<String> = missing.iter().map(|f| f.db_name.clone()).collect();
    info!(table, added = ?added, "table migrated");
    Ok(MigrationOutcome::Altered(added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{extract_fields, FieldKind, ModelDescription, ModelField};

    fn column(name: &str) -> DBColumnInfo {
        DBColumnInfo {
            name: name.to_string(),
            column_type: "int".to_string(),
            nullable: false,
            length: 0,
            default: None,
        }
    }

    fn declared() -> Vec<FieldDescriptor> {
        let model = ModelDescription::new("User")
            .field(
                ModelField::new("id", FieldKind::Value)
                    .annotate("db", "id")
                    .annotate("type", "int")
                    .annotate("key", "pk"),
            )
            .field(
                ModelField::new("legacy", FieldKind::Optional)
                    .annotate("db", "legacy,nomigrate")
                    .annotate("type", "text"),
            )
            .field(
                ModelField::new("email", FieldKind::Value)
                    .annotate("db", "email")
                    .annotate("type", "text"),
            )
            .field(
                ModelField::new("age", FieldKind::Optional)
                    .annotate("db", "age")
                    .annotate("type", "int"),
            );
        extract_fields(&model).unwrap()
    }

    #[test]
    fn test_new_fields_is_ordered_difference() {
        let declared = declared();
        let missing = new_fields(&declared, &[column("id")]);
        let names: Vec<&str> = missing.iter().map(|f| f.db_name.as_str()).collect();
        assert_eq!(names, vec!["email", "age"]);
    }

    #[test]
    fn test_new_fields_ignores_extra_live_columns() {
        let declared = declared();
        let live = vec![column("id"), column("email"), column("age"), column("dropped")];
        assert!(new_fields(&declared, &live).is_empty());
    }

    #[test]
    fn test_new_fields_idempotent() {
        let declared = declared();
        let mut live = vec![column("id")];
        for field in new_fields(&declared, &live) {
            live.push(column(&field.db_name));
        }
        assert!(new_fields(&declared, &live).is_empty());
    }
}
