//! Core types for ksstore.
//!
//! This crate holds what every record store shares:
//!
//! - **Errors**: the three-kind [`StoreError`] taxonomy and the mapping from
//!   backend [`Status`] codes onto it
//! - **Records**: the untyped [`Record`] mapping, query [`Term`]s and the
//!   [`bind`] / [`to_record`] JSON re-marshal helpers
//! - **Identifiers**: random record id generation
//!
//! # Example
//!
//! ```
//! use ksstore_core::{bind, Record, StoreError};
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: String,
//!     email: String,
//! }
//!
//! let record: Record = serde_json::from_value(json!({
//!     "id": "u1",
//!     "email": "ada@example.com",
//! }))
//! .unwrap();
//!
//! let user: User = bind(&record).unwrap();
//! assert_eq!(user.email, "ada@example.com");
//!
//! let err = bind::<User, _>(&json!({"id": 1})).unwrap_err();
//! assert_eq!(err, StoreError::InvalidData);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod record;

pub use error::{normalize, Code, Result, Status, StoreError};
pub use ids::{generate_id, resolve_id, ID_FIELD};
pub use record::{bind, to_record, Op, Record, Term};
