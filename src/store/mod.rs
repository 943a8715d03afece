//! Data Store contract and its implementations.

pub mod filter;
mod lock;
mod memory;
mod postgres;

pub use lock::{AdvisoryLocks, LockGuard, LockedStore};
pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A stored record: a JSON object whose `_id` is the string form of a [`RecordId`].
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const LOCATION_FIELD: &str = "_location";

/// Opaque record identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn generate() -> Self {
        RecordId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl FromStr for RecordId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(RecordId)
            .map_err(|_| StoreError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// `-1` and `"desc"` sort descending; anything else ascending.
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Number(n) if n.as_f64().map_or(false, |f| f < 0.0) => SortDirection::Desc,
            Value::String(s) if s == "-1" || s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        SortKey {
            field: field.into(),
            direction,
        }
    }
}

/// A ranged find. `limit == 0` means unlimited.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub fields: Option<Vec<String>>,
    pub skip: u64,
    pub limit: u64,
    pub sort: Vec<SortKey>,
}

impl FindQuery {
    pub fn filter(filter: Document) -> Self {
        FindQuery {
            filter,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError>;

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>, StoreError> {
        let query = FindQuery {
            filter: filter.clone(),
            limit: 1,
            ..FindQuery::default()
        };
        Ok(self.find(collection, &query).await?.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: Option<&Document>) -> Result<u64, StoreError>;

    /// Sum of the numeric values of `field` across matching records. Non-numbers are skipped.
    async fn sum(&self, collection: &str, filter: &Document, field: &str) -> Result<f64, StoreError>;

    /// Upsert by `_id`. Records without one get a fresh id and `_location` equal to the
    /// collection size at insert time.
    async fn save(&self, collection: &str, record: Document) -> Result<Document, StoreError>;

    /// Number of records removed.
    async fn delete(&self, collection: &str, id: &RecordId) -> Result<u64, StoreError>;

    /// Sets `patch` keys on every record matching `filter`. Returns the number touched.
    async fn update_fields(&self, collection: &str, filter: &Document, patch: &Document) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn id_from_str(&self, s: &str) -> Result<RecordId, StoreError> {
        s.parse()
    }
}

/// String `_id` of a record or filter, if present.
pub fn id_of(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Keeps only `fields` (plus `_id`) when a projection is requested.
pub fn project(doc: Document, fields: Option<&[String]>) -> Document {
    match fields {
        None => doc,
        Some(fields) => doc
            .into_iter()
            .filter(|(k, _)| k == ID_FIELD || fields.iter().any(|f| f == k))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_id_is_invalid() {
        assert!(matches!("not-a-uuid".parse::<RecordId>(), Err(StoreError::InvalidId(_))));
        let id = RecordId::generate();
        assert_eq!(id.to_string().parse::<RecordId>().unwrap(), id);
    }

    #[test]
    fn sort_direction_parsing() {
        assert_eq!(SortDirection::from_value(&json!(-1)), SortDirection::Desc);
        assert_eq!(SortDirection::from_value(&json!("-1")), SortDirection::Desc);
        assert_eq!(SortDirection::from_value(&json!(1)), SortDirection::Asc);
        assert_eq!(SortDirection::from_value(&json!(null)), SortDirection::Asc);
    }

    #[test]
    fn projection_keeps_id() {
        let doc = match json!({"_id": "x", "title": "a", "body": "b"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let out = project(doc, Some(&["title".to_string()]));
        assert_eq!(Value::Object(out), json!({"_id": "x", "title": "a"}));
    }
}
