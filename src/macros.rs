/// Declare a model struct and implement [`Model`](crate::field::Model) for it.
///
/// Field annotations go in a `#[column(...)]` attribute using the keys
/// understood by [`extract_fields`](crate::field::extract_fields). Every
/// field type must implement [`SqlField`](crate::field::SqlField), including
/// fields that carry no column.
///
/// ```
/// dbschema::model! {
///     #[derive(Debug, Default)]
///     pub struct User {
///         #[column(db = "id", type = "bigint", key = "pk")]
///         pub id: i64,
///         #[column(db = "email", type = "varchar", len = 255)]
///         pub email: String,
///         #[column(db = "nickname", type = "text", comment = "shown in the UI")]
///         pub nickname: Option<String>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[column($($key:tt = $val:literal),* $(,)?)])?
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($fvis $field: $ty,)*
        }

        impl $crate::field::Model for $name {
            fn describe() -> $crate::field::ModelDescription {
                $crate::field::ModelDescription::new(stringify!($name))
                    $(
                        .field(
                            $crate::field::ModelField::new(
                                stringify!($field),
                                <$ty as $crate::field::SqlField>::KIND,
                            )
                            $($(.annotate(stringify!($key), $val))*)?
                        )
                    )*
            }

            fn values(&self) -> ::std::vec::Vec<$crate::field::FieldValue> {
                ::std::vec![
                    $(
                        $crate::field::FieldValue {
                            name: stringify!($field).to_string(),
                            value: $crate::field::SqlField::to_value(&self.$field),
                            is_zero: $crate::field::SqlField::is_zero(&self.$field),
                        },
                    )*
                ]
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::field::{extract_fields, FieldKind, Model};
    use crate::DatabaseValue;
    use std::collections::HashMap;

    crate::model! {
        #[derive(Debug, Default)]
        struct Order {
            #[column(db = "id", type = "bigint,unsigned", key = "pk")]
            id: i64,
            #[column(db = "title", type = "varchar", len = 120, def = "'untitled'")]
            title: String,
            #[column(db = "note", type = "text")]
            note: Option<String>,
            #[column(db = "meta", type = "json")]
            meta: HashMap<String, String>,
            #[column(db = "hits,nomigrate", type = "int")]
            hits: i32,
            scratch: bool,
        }
    }

    #[test]
    fn test_describe() {
        let description = Order::describe();
        assert_eq!(description.name, "Order");
        assert_eq!(description.fields.len(), 6);
        assert_eq!(description.fields[2].kind, FieldKind::Optional);
        assert_eq!(description.fields[3].kind, FieldKind::Map);
        assert_eq!(description.fields[1].annotations.get("len"), "120");

        let fields = extract_fields(&description).unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.db_name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "note", "meta", "hits"]);
        assert!(fields[0].is_unsigned());
        assert_eq!(fields[1].default, "'untitled'");
        assert!(fields[3].nullable);
        assert!(!fields[4].migratable);
    }

    #[test]
    fn test_values() {
        let order = Order {
            id: 7,
            note: Some("fragile".to_string()),
            ..Default::default()
        };
        let values = order.values();

        assert_eq!(values[0].value, DatabaseValue::Integer(7));
        assert!(!values[0].is_zero);
        assert!(values[1].is_zero);
        assert_eq!(values[2].value, DatabaseValue::Text("fragile".to_string()));
        assert!(values[3].is_zero);
        assert!(values[5].is_zero);
    }
}
