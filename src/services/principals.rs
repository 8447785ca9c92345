use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::{DatabaseError, DocumentStore};
use crate::middleware::{Principal, PrincipalLookup};
use crate::schemas::user::USERS;

/// Resolves principals from the users collection.
pub struct StorePrincipals {
    store: Arc<dyn DocumentStore>,
}

impl StorePrincipals {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PrincipalLookup for StorePrincipals {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, DatabaseError> {
        let Some(doc) = self.store.find_by_id(USERS, id).await? else {
            return Ok(None);
        };
        let principal = Principal::from_document(&doc);
        if principal.is_none() {
            tracing::warn!("User {} cannot be read as a principal", id);
        }
        Ok(principal)
    }
}
