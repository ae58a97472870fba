//! Registering and retrieving whitelisted queries.

use crate::error::WhitelistError;
use crate::fingerprint::fingerprint;
use crate::parser::normalize;
use crate::store::WhitelistStore;
use std::sync::Arc;
use tracing::debug;

/// Normalizes, fingerprints and stores queries on top of a [`WhitelistStore`].
#[derive(Clone)]
pub struct QueryRepository {
    store: Arc<dyn WhitelistStore>,
}

impl QueryRepository {
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self { store }
    }

    /// Whitelist `query` and return its query id.
    ///
    /// Queries that normalize to the same text share one entry.
    pub async fn put(&self, query: &str) -> Result<String, WhitelistError> {
        let normalized = normalize(query)?;
        let query_id = fingerprint(&normalized.canonical);

        self.store.set(&query_id, &normalized.canonical).await?;

        debug!(
            query_id = %query_id,
            operation_name = ?normalized.operation_name,
            "Whitelisted query"
        );
        Ok(query_id)
    }

    /// Canonical text stored under `query_id`.
    pub async fn get(&self, query_id: &str) -> Result<Option<String>, WhitelistError> {
        self.store.get(query_id).await
    }
}
