use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::store::{DatabaseError, Document, DocumentStore, WRITE_ATTEMPTS};
use crate::config::FilterConfig;
use crate::filter::{Filter, FilterError, FilterOp, FilterWhereInfo, QueryParams, QuerySpec};
use crate::schemas::{Populate, ResourceSchema, SchemaError};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("No data found with that ID")]
    NotFound,

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Invalid(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] FilterError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Runs after a successful write. `before` is the stored state prior to an
/// update or delete; `after` is absent for deletes.
#[async_trait]
pub trait WriteTrigger: Send + Sync {
    async fn after_write(
        &self,
        store: &dyn DocumentStore,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> Result<(), DatabaseError>;
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub results: usize,
    pub documents: Vec<Document>,
}

/// CRUD over one resource, parameterized by its schema. Built once at
/// startup; every operation returns typed results and leaves HTTP mapping to
/// the caller. Returned documents have schema-hidden fields removed.
pub struct ResourceHandler<S: ResourceSchema> {
    schema: S,
    store: Arc<dyn DocumentStore>,
    filter: FilterConfig,
    trigger: Option<Arc<dyn WriteTrigger>>,
}

impl<S: ResourceSchema> ResourceHandler<S> {
    pub fn new(schema: S, store: Arc<dyn DocumentStore>, filter: FilterConfig) -> Self {
        Self { schema, store, filter, trigger: None }
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn WriteTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn collection(&self) -> &'static str {
        self.schema.collection().name
    }

    pub async fn create_one(&self, body: Map<String, Value>) -> Result<Document, ResourceError> {
        let data = self.schema.validate_create(body)?;
        let created = self.store.insert(self.collection(), data).await?;
        self.fire(None, Some(&created)).await?;
        tracing::debug!("Created {} {}", self.collection(), created.id);
        Ok(self.present(created))
    }

    pub async fn get_one(&self, id: &str, extra: Option<&Populate>) -> Result<Document, ResourceError> {
        let mut doc = self.find_scoped(parse_id(id)?).await?.ok_or(ResourceError::NotFound)?;
        let mut directives = self.schema.populate();
        directives.extend(extra.cloned());
        populate(self.store.as_ref(), std::slice::from_mut(&mut doc), &directives).await?;
        Ok(self.present(doc))
    }

    /// Lists documents matching `scope` (e.g. the parent tour of nested
    /// review routes) plus the request's query features.
    pub async fn get_all(&self, params: &QueryParams, scope: Vec<FilterWhereInfo>) -> Result<Listing, ResourceError> {
        let mut base = scope;
        base.extend(self.schema.default_scope());
        let spec = Filter::build(&self.filter, params, base)?;
        let mut documents = self.store.find(self.collection(), &spec).await?;
        populate(self.store.as_ref(), &mut documents, &self.schema.populate()).await?;
        let documents: Vec<Document> = documents.into_iter().map(|d| self.present(d)).collect();
        Ok(Listing { results: documents.len(), documents })
    }

    /// Merges `patch` into the stored document. The merge is redone on top of
    /// any write that lands between the read and the replace.
    pub async fn update_one(&self, id: &str, patch: Map<String, Value>) -> Result<Document, ResourceError> {
        let id = parse_id(id)?;
        let mut attempt = 1;
        let (existing, mut updated) = loop {
            let existing = self.find_scoped(id).await?.ok_or(ResourceError::NotFound)?;
            let data = self.schema.validate_update(&existing.data, patch.clone())?;
            match self.store.replace(self.collection(), id, existing.version, data).await {
                Ok(Some(updated)) => break (existing, updated),
                Ok(None) => return Err(ResourceError::NotFound),
                Err(DatabaseError::Conflict { .. }) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!("{} {} changed during update, retrying", self.collection(), id);
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };
        self.fire(Some(&existing), Some(&updated)).await?;
        populate(self.store.as_ref(), std::slice::from_mut(&mut updated), &self.schema.populate()).await?;
        Ok(self.present(updated))
    }

    pub async fn delete_one(&self, id: &str) -> Result<(), ResourceError> {
        let id = parse_id(id)?;
        if self.find_scoped(id).await?.is_none() {
            return Err(ResourceError::NotFound);
        }
        let deleted = self
            .store
            .delete(self.collection(), id)
            .await?
            .ok_or(ResourceError::NotFound)?;
        self.fire(Some(&deleted), None).await?;
        tracing::debug!("Deleted {} {}", self.collection(), id);
        Ok(())
    }

    /// Strips hidden fields for output.
    pub fn present(&self, mut doc: Document) -> Document {
        doc.remove_fields(self.schema.hidden_fields());
        doc
    }

    async fn find_scoped(&self, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        let mut conditions = vec![FilterWhereInfo::eq("id", id.to_string())];
        conditions.extend(self.schema.default_scope());
        self.store.find_one(self.collection(), conditions).await
    }

    async fn fire(&self, before: Option<&Document>, after: Option<&Document>) -> Result<(), DatabaseError> {
        if let Some(trigger) = &self.trigger {
            trigger.after_write(self.store.as_ref(), before, after).await?;
        }
        Ok(())
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid, ResourceError> {
    Uuid::parse_str(raw).map_err(|_| ResourceError::InvalidId(raw.to_string()))
}

/// Expands population directives in place. Virtual population resolves one
/// further level of references on the attached documents.
pub async fn populate(
    store: &dyn DocumentStore,
    docs: &mut [Document],
    directives: &[Populate],
) -> Result<(), DatabaseError> {
    if docs.is_empty() {
        return Ok(());
    }
    for directive in directives {
        match directive {
            Populate::Reference { .. } => populate_reference(store, docs, directive).await?,
            Populate::Virtual { path, collection, foreign_field, hidden, populate: nested } => {
                let ids: Vec<Value> = docs.iter().map(|d| Value::String(d.id.to_string())).collect();
                let spec = QuerySpec::matching(vec![FilterWhereInfo::new(*foreign_field, FilterOp::In, Value::Array(ids))]);
                let mut children = store.find(collection, &spec).await?;
                for reference in nested.iter() {
                    populate_reference(store, &mut children, reference).await?;
                }
                let mut by_parent: HashMap<String, Vec<Value>> = HashMap::new();
                for mut child in children {
                    let Some(parent) = child.get_str(foreign_field).map(str::to_string) else {
                        continue;
                    };
                    child.remove_fields(hidden);
                    by_parent.entry(parent).or_default().push(child.to_json());
                }
                for doc in docs.iter_mut() {
                    let attached = by_parent.remove(&doc.id.to_string()).unwrap_or_default();
                    doc.data.insert(path.to_string(), Value::Array(attached));
                }
            }
        }
    }
    Ok(())
}

async fn populate_reference(
    store: &dyn DocumentStore,
    docs: &mut [Document],
    directive: &Populate,
) -> Result<(), DatabaseError> {
    let Populate::Reference { path, collection, hidden } = directive else {
        return Ok(());
    };

    let mut ids: Vec<Value> = Vec::new();
    for doc in docs.iter() {
        match doc.data.get(*path) {
            Some(Value::String(id)) => ids.push(Value::String(id.clone())),
            Some(Value::Array(items)) => ids.extend(items.iter().filter(|v| v.is_string()).cloned()),
            _ => {}
        }
    }
    if ids.is_empty() {
        return Ok(());
    }
    ids.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    ids.dedup();

    let spec = QuerySpec::matching(vec![FilterWhereInfo::new("id", FilterOp::In, Value::Array(ids))]);
    let found: HashMap<String, Value> = store
        .find(collection, &spec)
        .await?
        .into_iter()
        .map(|mut d| {
            d.remove_fields(hidden);
            (d.id.to_string(), d.to_json())
        })
        .collect();

    for doc in docs.iter_mut() {
        let replacement = match doc.data.get(*path) {
            Some(Value::String(id)) => found.get(id).cloned().unwrap_or(Value::Null),
            Some(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .filter_map(|v| v.as_str().and_then(|id| found.get(id)).cloned())
                    .collect(),
            ),
            _ => continue,
        };
        doc.data.insert(path.to_string(), replacement);
    }
    Ok(())
}
