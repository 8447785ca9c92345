use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::filter::{Aggregation, FilterError, FilterWhereInfo, QuerySpec};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate value in {collection} for ({fields})")]
    UniqueViolation { collection: String, fields: String },

    #[error("Document {id} in {collection} was modified concurrently")]
    Conflict { collection: String, id: Uuid },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Read-modify-write cycles give up after this many version conflicts.
pub const WRITE_ATTEMPTS: usize = 5;

/// Registration data for a collection: its name and the field sets whose
/// combined values must be unique across documents.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub unique_keys: &'static [&'static [&'static str]],
}

/// A stored document. `version` is bumped on every replace and never
/// rendered; the JSON form is `{ "id": ..., ...data }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub version: i32,
    pub data: Map<String, Value>,
}

impl Document {
    /// Field lookup with dotted paths; `id`/`_id` resolve to the identity.
    pub fn get(&self, path: &str) -> Option<Value> {
        if path == "id" || path == "_id" {
            return Some(Value::String(self.id.to_string()));
        }
        lookup_path(&self.data, path).cloned()
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn remove_fields(&mut self, fields: &[&str]) {
        for field in fields {
            self.data.remove(*field);
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::with_capacity(self.data.len() + 1);
        out.insert("id".to_string(), Value::String(self.id.to_string()));
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

pub fn lookup_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Persistence seam. Every backend executes [`QuerySpec`] and
/// [`Aggregation`] with the same semantics.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates backing storage and unique constraints if missing.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), DatabaseError>;

    async fn find(&self, collection: &str, spec: &QuerySpec) -> Result<Vec<Document>, DatabaseError>;

    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Document>, DatabaseError>;

    async fn insert(&self, collection: &str, data: Map<String, Value>) -> Result<Document, DatabaseError>;

    /// Replaces the data of a document still at `version`. `None` when it is
    /// gone, `Conflict` when another write bumped the version first.
    async fn replace(
        &self,
        collection: &str,
        id: Uuid,
        version: i32,
        data: Map<String, Value>,
    ) -> Result<Option<Document>, DatabaseError>;

    async fn delete(&self, collection: &str, id: Uuid) -> Result<Option<Document>, DatabaseError>;

    async fn aggregate(&self, collection: &str, aggregation: &Aggregation) -> Result<Vec<Value>, DatabaseError>;

    async fn find_one(
        &self,
        collection: &str,
        conditions: Vec<FilterWhereInfo>,
    ) -> Result<Option<Document>, DatabaseError> {
        let spec = QuerySpec::matching(conditions).with_limit(1);
        Ok(self.find(collection, &spec).await?.into_iter().next())
    }

    /// Read-modify-write of one document, re-read and retried while other
    /// writers get in between. `None` when the document is gone.
    async fn modify(
        &self,
        collection: &str,
        id: Uuid,
        change: &(dyn Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync),
    ) -> Result<Option<Document>, DatabaseError> {
        let mut attempt = 1;
        loop {
            let Some(current) = self.find_by_id(collection, id).await? else {
                return Ok(None);
            };
            match self.replace(collection, id, current.version, change(current.data)).await {
                Err(DatabaseError::Conflict { .. }) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!("{} {} changed during update, retrying", collection, id);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        let data = json!({"name": "The Forest Hiker", "startLocation": {"coordinates": [-80.1, 25.7]}, "secret": "x"});
        Document {
            id: Uuid::nil(),
            created_at: Utc::now(),
            version: 3,
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn renders_id_and_data_without_version() {
        let value = doc().to_json();
        assert_eq!(value["id"], json!(Uuid::nil().to_string()));
        assert_eq!(value["name"], json!("The Forest Hiker"));
        assert!(value.get("version").is_none());
    }

    #[test]
    fn looks_up_nested_paths() {
        let d = doc();
        assert_eq!(d.get("startLocation.coordinates"), Some(json!([-80.1, 25.7])));
        assert_eq!(d.get("_id"), Some(json!(Uuid::nil().to_string())));
        assert_eq!(d.get("name.first"), None);
        assert_eq!(d.get("missing"), None);
    }

    #[test]
    fn removes_hidden_fields() {
        let mut d = doc();
        d.remove_fields(&["secret"]);
        assert!(d.to_json().get("secret").is_none());
    }
}
