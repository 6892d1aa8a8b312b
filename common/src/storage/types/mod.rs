use serde::{Deserialize, Serialize};
pub mod chat;
pub mod chunk;
pub mod collection;
pub mod document;
pub mod message;
pub mod processing_progress;
pub mod provider;
pub mod rag_settings;
pub mod user_settings;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Serde adapters shared by every stored object.
///
/// SurrealDB hands ids back as `Thing` records and datetimes as its own `Datetime`; the
/// structs keep plain `String` ids and chrono timestamps.
pub mod serde_helpers {
    use chrono::{DateTime, Utc};
    use serde::{
        de::{self, Visitor},
        Deserialize, Deserializer, Serialize, Serializer,
    };
    use std::fmt;
    use surrealdb::sql::Thing;

    struct FlexibleIdVisitor;

    impl<'de> Visitor<'de> for FlexibleIdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a Thing")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
            Ok(thing.id.to_raw())
        }
    }

    pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FlexibleIdVisitor)
    }

    pub fn serialize_datetime<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Into::<surrealdb::sql::Datetime>::into(*date).serialize(serializer)
    }

    pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dt = surrealdb::sql::Datetime::deserialize(deserializer)?;
        Ok(DateTime::<Utc>::from(dt))
    }

    #[allow(clippy::ref_option)]
    pub fn serialize_option_datetime<S>(
        date: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => serializer.serialize_some(&Into::<surrealdb::sql::Datetime>::into(*dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize_option_datetime<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<surrealdb::sql::Datetime>::deserialize(deserializer)?;
        Ok(value.map(DateTime::<Utc>::from))
    }
}

/// Declares a SurrealDB-backed record: `id`, `created_at`, `updated_at` plus the given fields,
/// and its `StoredObject` impl.
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "crate::storage::types::serde_helpers::deserialize_flexible_id")]
            pub id: String,
            #[serde(
                serialize_with = "crate::storage::types::serde_helpers::serialize_datetime",
                deserialize_with = "crate::storage::types::serde_helpers::deserialize_datetime",
                default
            )]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(
                serialize_with = "crate::storage::types::serde_helpers::serialize_datetime",
                deserialize_with = "crate::storage::types::serde_helpers::deserialize_datetime",
                default
            )]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl $crate::storage::types::StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}

pub(crate) use stored_object;
