// Live-server tests, enabled with the `integration_tests` feature.
// They read POSTGRES_TEST_URL / MYSQL_TEST_URL and skip when unset.

use crate::dialect::{new_database, DatabaseParams, Dialect, InsertExt, Payload, Returning};
use crate::migration::{migrate_schema, MigrationOutcome};
use crate::query::Query;
use crate::schema::{Schema, SchemaParams};
use crate::{DatabaseValue, Error};

crate::model! {
    #[derive(Debug, Default)]
    struct Gadget {
        #[column(db = "id", type = "int", key = "pk")]
        id: i32,
        #[column(db = "label", type = "varchar", len = 64)]
        label: String,
        #[column(db = "note", type = "text")]
        note: Option<String>,
    }
}

fn table_name() -> String {
    format!("gadget_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(feature = "postgres")]
#[tokio::test]
async fn test_postgres_round_trip() {
    let Ok(url) = std::env::var("POSTGRES_TEST_URL") else {
        return;
    };
    let table = table_name();
    let db = new_database(DatabaseParams::new("pg", Dialect::Postgres, url).with_max_open_conns(4))
        .unwrap();
    db.connect().await.unwrap();

    let schema = Schema::new(SchemaParams::for_model::<Gadget>("gadget", "pg", table.as_str())).unwrap();
    schema.bind(db.clone(), None).unwrap();

    let first = migrate_schema(db.as_ref(), &table, schema.fields()).await.unwrap();
    assert_eq!(first, MigrationOutcome::Created);
    let second = migrate_schema(db.as_ref(), &table, schema.fields()).await.unwrap();
    assert_eq!(second, MigrationOutcome::UpToDate);

    let row = Gadget {
        id: 1,
        label: "first".to_string(),
        note: None,
    };
    let ext = InsertExt::new().returning(Returning::columns(["id", "label"]));
    let outcome = schema
        .insert(&Payload::model(&row), Some(&ext), &[])
        .await
        .unwrap();
    let returned = outcome.returned.unwrap();
    assert_eq!(returned.get_i64("id").unwrap(), 1);
    assert_eq!(returned.get_string("label").unwrap(), "first");

    let updated = schema
        .update(
            &Payload::values().set("note", "checked"),
            "id = $1",
            None,
            &[DatabaseValue::from(1)],
        )
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 1);

    let found = schema
        .select_one(&Query::new().filter("label = $1"), &[DatabaseValue::from("first")])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.try_get_string("note").unwrap().as_deref(), Some("checked"));

    db.close().await.unwrap();
}

#[cfg(feature = "mysql")]
#[tokio::test]
async fn test_mysql_round_trip() {
    let Ok(url) = std::env::var("MYSQL_TEST_URL") else {
        return;
    };
    let table = table_name();
    let db = new_database(DatabaseParams::new("my", Dialect::MySql, url).with_max_open_conns(4))
        .unwrap();
    db.connect().await.unwrap();

    let schema = Schema::new(SchemaParams::for_model::<Gadget>("gadget", "my", table.as_str())).unwrap();
    schema.bind(db.clone(), None).unwrap();

    let first = migrate_schema(db.as_ref(), &table, schema.fields()).await.unwrap();
    assert_eq!(first, MigrationOutcome::Created);

    let row = Gadget {
        id: 5,
        label: "first".to_string(),
        note: None,
    };
    let ext = InsertExt::new().returning(Returning::columns(["id"]));
    let outcome = schema
        .insert(&Payload::model(&row), Some(&ext), &[])
        .await
        .unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert!(outcome.returned.is_some());

    let two = InsertExt::new().returning(Returning::columns(["id", "label"]));
    assert!(matches!(
        schema.insert(&Payload::model(&row), Some(&two), &[]).await,
        Err(Error::UnsupportedReturning { .. })
    ));

    let removed = schema
        .delete("id = ?", None, &[DatabaseValue::from(5)])
        .await
        .unwrap();
    assert_eq!(removed.rows_affected, 1);

    db.close().await.unwrap();
}
