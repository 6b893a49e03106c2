//! Generic record storage over Firestore.
//!
//! This crate exposes schema-less CRUD and query operations through the
//! [`Storer`] trait, with a Firestore implementation speaking the v1 REST API
//! and an in-memory implementation for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Caller         │────▶│   Storer         │
//! │                  │     │   (trait)        │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                  ┌────────────────┴───────────────┐
//!                  │                                │
//!         ┌────────▼─────────┐             ┌────────▼─────────┐
//!         │  FirestoreStore  │             │   MemoryStore    │
//!         └────────┬─────────┘             └──────────────────┘
//!                  │
//!         ┌────────▼─────────┐
//!         │ FirestoreClient  │
//!         └────────┬─────────┘
//!                  │ HTTPS
//!         ┌────────▼─────────┐
//!         │  Firestore API   │
//!         └──────────────────┘
//! ```
//!
//! Backend failures are reported as one of the three [`StoreError`] kinds.
//!
//! # Example
//!
//! ```no_run
//! use ksstore::{FirestoreStore, Storer, Term};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = FirestoreStore::open("my-project")?;
//! store.set_table("users");
//!
//! let created = store.set("", &json!({"name": "Ada", "role": "admin"})).await?;
//! let id = created["id"].as_str().unwrap_or_default().to_string();
//!
//! let admins = store.query(&[Term::new("role", "==", "admin")]).await?;
//! assert!(!admins.is_empty());
//!
//! store.delete(&id).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod firestore;
pub mod memory;
pub mod query;
pub mod value;

pub use client::{ConnectError, FirestoreClient};
pub use config::{StoreConfig, TermMode};
pub use firestore::FirestoreStore;
pub use ksstore_core::{bind, to_record, Code, Op, Record, Result, Status, StoreError, Term};
pub use memory::{MemoryBackend, MemoryStore};

use async_trait::async_trait;
use serde::Serialize;

/// Record storage operations against one table.
///
/// A handle targets one table at a time. To work on several tables
/// concurrently, use several handles sharing one client.
#[async_trait]
pub trait Storer: Send + Sync {
    /// Backend client handle type.
    type Client: Send + Sync;

    /// The backend client, for operations this trait does not cover.
    fn client(&self) -> &Self::Client;

    /// The active table.
    fn table(&self) -> &str;

    /// Switch the active table. The name is not validated.
    fn set_table(&mut self, table: &str);

    /// Get the record with the given id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    async fn get(&self, id: &str) -> Result<Record>;

    /// Merge a prepared record into the record with the given id.
    ///
    /// An empty `id` is replaced by a freshly generated one. The id is
    /// written into the record's `id` field. Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the read-back fails.
    async fn set_record(&self, id: &str, record: Record) -> Result<Record>;

    /// Serialize `input` and merge it into the record with the given id.
    ///
    /// Fields of an existing record that `input` does not mention are left
    /// untouched. Returns the full stored record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidData` if `input` is not a JSON object (or
    /// `null`), or an error if the write or read-back fails.
    async fn set<T>(&self, id: &str, input: &T) -> Result<Record>
    where
        T: Serialize + Sync + ?Sized,
    {
        let record = to_record(input)?;
        self.set_record(id, record).await
    }

    /// List every record in the table.
    ///
    /// # Errors
    ///
    /// Returns an error if any page fails; partial results are discarded.
    async fn all(&self) -> Result<Vec<Record>>;

    /// List the records matching `terms`.
    ///
    /// How several terms combine depends on the store's [`TermMode`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidData` for an empty or malformed term list,
    /// or an error if the query fails.
    async fn query(&self, terms: &[Term]) -> Result<Vec<Record>>;

    /// Delete the record with the given id, returning its last contents.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    async fn delete(&self, id: &str) -> Result<Record>;
}
