//! Store configuration.
//!
//! This module defines how a [`FirestoreStore`](crate::FirestoreStore) reaches
//! its database and how it pages and filters results.

use std::time::Duration;

use serde::Deserialize;

/// Environment variable naming a local Firestore emulator (`host:port`).
pub const EMULATOR_HOST_ENV: &str = "FIRESTORE_EMULATOR_HOST";

/// How a query combines several [`Term`](ksstore_core::Term)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermMode {
    /// Only the last term constrains the query; earlier terms are ignored.
    ///
    /// This is the long-standing behavior and remains the default until
    /// callers have confirmed they rely on conjunctive queries.
    #[default]
    LastTermWins,
    /// Every term constrains the query (logical AND).
    AllTerms,
}

/// Configuration for a Firestore-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Google Cloud project id.
    pub project_id: String,

    /// Database id within the project.
    #[serde(default = "StoreConfig::default_database")]
    pub database: String,

    /// Firestore API origin.
    #[serde(default = "StoreConfig::default_base_url")]
    pub base_url: String,

    /// Emulator `host:port`; when set, overrides `base_url` with plain HTTP.
    #[serde(default)]
    pub emulator_host: Option<String>,

    /// Pre-issued OAuth2 access token sent as a bearer token.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Documents requested per page when listing a collection.
    #[serde(default = "StoreConfig::default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "StoreConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "StoreConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// How multi-term queries are built.
    #[serde(default)]
    pub term_mode: TermMode,
}

impl StoreConfig {
    fn default_database() -> String {
        "(default)".to_string()
    }

    fn default_base_url() -> String {
        "https://firestore.googleapis.com".to_string()
    }

    const fn default_page_size() -> u32 {
        300
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    const fn default_connect_timeout() -> u64 {
        5
    }

    /// Configuration for `project_id` with every other field defaulted.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: Self::default_database(),
            base_url: Self::default_base_url(),
            emulator_host: None,
            access_token: None,
            page_size: Self::default_page_size(),
            request_timeout_seconds: Self::default_request_timeout(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            term_mode: TermMode::default(),
        }
    }

    /// Like [`StoreConfig::new`], picking up `FIRESTORE_EMULATOR_HOST`.
    pub fn from_env(project_id: impl Into<String>) -> Self {
        let mut config = Self::new(project_id);
        config.emulator_host = std::env::var(EMULATOR_HOST_ENV)
            .ok()
            .filter(|host| !host.is_empty());
        config
    }

    /// Set the term mode.
    #[must_use]
    pub const fn with_term_mode(mut self, term_mode: TermMode) -> Self {
        self.term_mode = term_mode;
        self
    }

    /// Point the store at another API origin (an emulator or a mock server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.emulator_host = None;
        self
    }

    /// The origin requests are sent to.
    #[must_use]
    pub fn origin(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{host}"),
            None => self.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Root URL of the database's documents.
    #[must_use]
    pub fn documents_root(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            self.origin(),
            self.project_id,
            self.database
        )
    }


    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::new("demo");
        assert_eq!(config.database, "(default)");
        assert_eq!(config.page_size, 300);
        assert_eq!(config.term_mode, TermMode::LastTermWins);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn config_urls() {
        let config = StoreConfig::new("demo");
        assert_eq!(
            config.documents_root(),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents"
        );
    }

    #[test]
    fn emulator_overrides_origin() {
        let mut config = StoreConfig::new("demo");
        config.emulator_host = Some("localhost:8080".to_string());
        assert_eq!(config.origin(), "http://localhost:8080");

        let config = config.with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.origin(), "http://127.0.0.1:9000");
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"project_id": "demo", "term_mode": "all_terms", "page_size": 50}"#,
        )
        .unwrap();
        assert_eq!(config.term_mode, TermMode::AllTerms);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.base_url, "https://firestore.googleapis.com");
        assert!(config.access_token.is_none());
    }
}
