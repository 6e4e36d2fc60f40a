use std::sync::Arc;

use crate::connection::mock::{MockConnection, ValueRow};
use crate::dialect::{Database, DatabaseParams, Dialect, MySqlDatabase, PostgresDatabase};
use crate::error::ErrorKind;
use crate::field::{extract_fields, FieldDescriptor, FieldKind, ModelDescription, ModelField};
use crate::migration::{migrate_schema, MigrationOutcome};

fn user_model(with_age: bool) -> Vec<FieldDescriptor> {
    let mut model = ModelDescription::new("User")
        .field(
            ModelField::new("id", FieldKind::Value)
                .annotate("db", "id")
                .annotate("type", "int")
                .annotate("key", "pk"),
        )
        .field(
            ModelField::new("name", FieldKind::Optional)
                .annotate("db", "name")
                .annotate("type", "varchar")
                .annotate("len", 100),
        );
    if with_age {
        model = model.field(
            ModelField::new("age", FieldKind::Optional)
                .annotate("db", "age")
                .annotate("type", "int"),
        );
    }
    extract_fields(&model).unwrap()
}

fn postgres() -> (PostgresDatabase, MockConnection) {
    let mock = MockConnection::new();
    let params = DatabaseParams::new("main", Dialect::Postgres, "postgres://test");
    (
        PostgresDatabase::with_connection(params, Arc::new(mock.clone())),
        mock,
    )
}

fn live_column(name: &str, column_type: &str) -> ValueRow {
    ValueRow::new()
        .with("name", name)
        .with("type", column_type)
        .with("nullable", true)
        .with("length", 0_i64)
}

/// Statements other than catalog lookups
fn ddl(mock: &MockConnection) -> Vec<String> {
    mock.sql()
        .into_iter()
        .filter(|sql| !sql.starts_with("SELECT"))
        .collect()
}

#[tokio::test]
async fn test_creates_missing_table() {
    let (db, mock) = postgres();

    let outcome = migrate_schema(&db, "t", &user_model(false)).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Created);
    assert_eq!(
        ddl(&mock),
        vec!["CREATE TABLE t (\n\"id\" int NOT NULL,\n\"name\" varchar(100) NULL,\nPRIMARY KEY (\"id\")\n);".to_string()]
    );
}

#[tokio::test]
async fn test_adds_only_new_column() {
    let (db, mock) = postgres();
    mock.respond(
        "information_schema.\"tables\"",
        vec![ValueRow::new().with("exists", true)],
    );
    mock.respond(
        "information_schema.\"columns\"",
        vec![live_column("id", "int4"), live_column("name", "varchar")],
    );

    let outcome = migrate_schema(&db, "t", &user_model(true)).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Altered(vec!["age".to_string()]));
    assert_eq!(
        ddl(&mock),
        vec!["ALTER TABLE t ADD COLUMN \"age\" int NULL;".to_string()]
    );
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let (db, mock) = postgres();
    mock.respond(
        "information_schema.\"tables\"",
        vec![ValueRow::new().with("exists", true)],
    );
    mock.respond(
        "information_schema.\"columns\"",
        vec![
            live_column("id", "int4"),
            live_column("name", "varchar"),
            live_column("age", "int4"),
        ],
    );

    let outcome = migrate_schema(&db, "t", &user_model(true)).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::UpToDate);
    assert!(ddl(&mock).is_empty());
}

#[tokio::test]
async fn test_mysql_alters_column_by_column() {
    let mock = MockConnection::new();
    let params = DatabaseParams::new("main", Dialect::MySql, "mysql://test");
    let db = MySqlDatabase::with_connection(params, Arc::new(mock.clone()));
    mock.respond(
        "information_schema.TABLES",
        vec![ValueRow::new().with("exists", 1_i64)],
    );
    mock.respond(
        "information_schema.COLUMNS",
        vec![ValueRow::new()
            .with("name", "id")
            .with("type", "int")
            .with("nullable", 0_i64)],
    );

    let outcome = migrate_schema(&db, "t", &user_model(true)).await.unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Altered(vec!["name".to_string(), "age".to_string()])
    );
    assert_eq!(
        ddl(&mock),
        vec![
            "ALTER TABLE `t` ADD `name` varchar(100) NULL;".to_string(),
            "ALTER TABLE `t` ADD `age` int NULL;".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_catalog_failure_stops_migration() {
    let (db, mock) = postgres();
    mock.fail_on("information_schema");

    let err = migrate_schema(&db, "t", &user_model(false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Catalog);
    assert!(ddl(&mock).is_empty());
}

#[tokio::test]
async fn test_engine_is_usable_as_trait_object() {
    let (db, _) = postgres();
    let db: Arc<dyn Database> = Arc::new(db);
    let outcome = migrate_schema(db.as_ref(), "t", &user_model(false))
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::Created);
}
