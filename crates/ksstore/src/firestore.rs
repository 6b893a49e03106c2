//! Firestore storage implementation.
//!
//! This module provides the `FirestoreStore` implementation of the `Storer`
//! trait.

use std::sync::Arc;

use async_trait::async_trait;
use ksstore_core::{resolve_id, Record, Result, StoreError, Term, ID_FIELD};
use serde_json::Value;

use crate::client::{ConnectError, FirestoreClient};
use crate::config::{StoreConfig, TermMode};
use crate::query;
use crate::value::Document;
use crate::Storer;

/// Firestore-backed record store.
///
/// Clones and [`FirestoreStore::with_table`] handles share one client.
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    table: String,
    client: Arc<FirestoreClient>,
    term_mode: TermMode,
}

impl FirestoreStore {
    /// Build a client for `config` and return a store with no table selected.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn connect(config: StoreConfig) -> std::result::Result<Self, ConnectError> {
        let client = FirestoreClient::new(config).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to connect Firestore store");
        })?;
        tracing::info!(
            project_id = %client.config().project_id,
            database = %client.config().database,
            origin = %client.config().origin(),
            "Connected Firestore store"
        );
        Ok(Self::from_client(Arc::new(client)))
    }

    /// Connect to `project_id` with default settings, honoring
    /// `FIRESTORE_EMULATOR_HOST`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn open(project_id: impl Into<String>) -> std::result::Result<Self, ConnectError> {
        Self::connect(StoreConfig::from_env(project_id))
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(client: Arc<FirestoreClient>) -> Self {
        let term_mode = client.config().term_mode;
        Self {
            table: String::new(),
            client,
            term_mode,
        }
    }

    /// A new handle on `table` sharing this store's client.
    #[must_use]
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            client: Arc::clone(&self.client),
            term_mode: self.term_mode,
        }
    }

    /// The term mode used by [`Storer::query`].
    #[must_use]
    pub const fn term_mode(&self) -> TermMode {
        self.term_mode
    }
}

#[async_trait]
impl Storer for FirestoreStore {
    type Client = FirestoreClient;

    fn client(&self) -> &FirestoreClient {
        &self.client
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn set_table(&mut self, table: &str) {
        self.table = table.to_string();
    }

    async fn get(&self, id: &str) -> Result<Record> {
        self.client
            .get_document(&self.table, id)
            .await
            .map(Document::into_record)
            .map_err(|status| {
                tracing::debug!(table = %self.table, id, status = %status, "Get failed");
                StoreError::from_status(&status, Some(StoreError::InvalidData))
            })
    }

    async fn set_record(&self, id: &str, mut record: Record) -> Result<Record> {
        let id = resolve_id(id);
        record.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        self.client
            .merge_document(&self.table, &id, &record)
            .await
            .map_err(|status| {
                tracing::error!(table = %self.table, id = %id, status = %status, "Failed to write record");
                StoreError::from_status(&status, None)
            })?;

        self.get(&id).await
    }

    async fn all(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_documents(&self.table, page_token.as_deref())
                .await
                .map_err(|status| {
                    tracing::error!(table = %self.table, status = %status, "Failed to list records");
                    StoreError::from_status(&status, Some(StoreError::InvalidData))
                })?;

            records.extend(page.documents.into_iter().map(Document::into_record));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(table = %self.table, count = records.len(), "Listed records");
        Ok(records)
    }

    async fn query(&self, terms: &[Term]) -> Result<Vec<Record>> {
        let predicates = query::predicates(terms, self.term_mode)?;
        let structured = query::build(&self.table, &predicates)?;

        let documents = self
            .client
            .run_query(&self.table, &structured)
            .await
            .map_err(|status| {
                tracing::error!(table = %self.table, status = %status, "Failed to run query");
                StoreError::from_status(&status, Some(StoreError::InvalidData))
            })?;

        Ok(documents.into_iter().map(Document::into_record).collect())
    }

    async fn delete(&self, id: &str) -> Result<Record> {
        let record = self.get(id).await?;

        self.client
            .delete_document(&self.table, id)
            .await
            .map_err(|status| {
                tracing::error!(table = %self.table, id, status = %status, "Failed to delete record");
                StoreError::from_status(&status, None)
            })?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FirestoreStore {
        FirestoreStore::connect(StoreConfig::new("demo")).unwrap()
    }

    #[test]
    fn starts_without_table() {
        let store = store();
        assert_eq!(store.table(), "");
        assert_eq!(store.term_mode(), TermMode::LastTermWins);
    }

    #[test]
    fn handles_share_client() {
        let mut users = store();
        users.set_table("users");
        let orders = users.with_table("orders");

        assert_eq!(users.table(), "users");
        assert_eq!(orders.table(), "orders");
        assert!(Arc::ptr_eq(&users.client, &orders.client));
    }

    #[test]
    fn term_mode_follows_config() {
        let config = StoreConfig::new("demo").with_term_mode(TermMode::AllTerms);
        let store = FirestoreStore::connect(config).unwrap();
        assert_eq!(store.with_table("t").term_mode(), TermMode::AllTerms);
    }

    #[test]
    fn connect_rejects_empty_project() {
        assert!(matches!(
            FirestoreStore::connect(StoreConfig::new("")),
            Err(ConnectError::MissingProjectId)
        ));
    }
}
