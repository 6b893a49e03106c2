//! HTTP client for the Firestore REST API.
//!
//! This module provides [`FirestoreClient`], a thin wrapper over the v1
//! document endpoints. Every method reports failures as a backend
//! [`Status`]; translating those into store errors is the caller's job.

use ksstore_core::{Code, Record, Status};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::query::StructuredQuery;
use crate::value::{encode_fields, field_paths, Document, FieldValue};

/// Errors raised while setting up a client.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No project id was configured.
    #[error("project id is empty")]
    MissingProjectId,

    /// The configured endpoint is not a usable base URL.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// One page of a collection listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    /// Documents on this page.
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Token for the next page; absent or empty on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Request body for a merge write.
#[derive(Debug, Serialize)]
struct WriteBody {
    fields: std::collections::BTreeMap<String, FieldValue>,
}

/// Request body for `runQuery`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryRequest<'a> {
    structured_query: &'a StructuredQuery,
}

/// One element of the streamed `runQuery` response.
#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    #[serde(default)]
    document: Option<Document>,
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Client for one Firestore database.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct FirestoreClient {
    http: reqwest::Client,
    config: StoreConfig,
    root: Url,
}

impl FirestoreClient {
    /// Create a client for the database described by `config`.
    ///
    /// No request is made; an unreachable database surfaces on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the project id is empty, the endpoint does not
    /// form a valid URL, or the HTTP client cannot be built.
    pub fn new(config: StoreConfig) -> Result<Self, ConnectError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Self::with_client(http, config)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the project id is empty or the endpoint does not
    /// form a valid URL.
    pub fn with_client(http: reqwest::Client, config: StoreConfig) -> Result<Self, ConnectError> {
        if config.project_id.is_empty() {
            return Err(ConnectError::MissingProjectId);
        }

        let root = parse_base(&config.documents_root())?;

        Ok(Self { http, config, root })
    }

    /// The configuration this client was built from.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// URL of `{root}/{collection}[/{id}]`.
    ///
    /// `collection` may be a subcollection path such as `users/u1/orders`;
    /// it is split on `/`. The id is always a single segment, so a `/` in it
    /// is percent-encoded.
    fn url(&self, collection: &str, id: Option<&str>) -> Result<Url, Status> {
        let segments = collection_segments(collection)?;
        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|()| Status::new(Code::Internal, "documents root is not a base URL"))?
            .extend(segments)
            .extend(id);
        Ok(url)
    }

    /// URL of the `runQuery` endpoint for `collection`'s parent.
    fn run_query_url(&self, collection: &str) -> Result<Url, Status> {
        let segments = collection_segments(collection)?;
        let parent = &segments[..segments.len().saturating_sub(1)];

        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|()| Status::new(Code::Internal, "documents root is not a base URL"))?
            .extend(parent);
        let path = format!("{}:runQuery", url.path());
        url.set_path(&path);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Fetch one document.
    ///
    /// # Errors
    ///
    /// Returns a `NOT_FOUND` status if the document does not exist, or the
    /// backend/transport status of any other failure.
    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Document, Status> {
        let url = self.url(collection, Some(id))?;
        tracing::debug!(collection, id, "Fetching document");

        let response = send(self.request(Method::GET, url)).await?;
        decode(response).await
    }

    /// Merge `record` into a document, creating it if absent.
    ///
    /// Only the leaf field paths present in `record` are written.
    ///
    /// # Errors
    ///
    /// Returns the backend/transport status on failure.
    pub async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        record: &Record,
    ) -> Result<Document, Status> {
        let url = self.url(collection, Some(id))?;
        let mask: Vec<(&str, String)> = field_paths(record)
            .into_iter()
            .map(|path| ("updateMask.fieldPaths", path))
            .collect();
        tracing::debug!(collection, id, fields = mask.len(), "Merging document");

        let body = WriteBody {
            fields: encode_fields(record),
        };
        let response = send(
            self.request(Method::PATCH, url)
                .query(&mask)
                .json(&body),
        )
        .await?;
        decode(response).await
    }

    /// Delete a document. Deleting an absent document succeeds.
    ///
    /// # Errors
    ///
    /// Returns the backend/transport status on failure.
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<(), Status> {
        let url = self.url(collection, Some(id))?;
        tracing::debug!(collection, id, "Deleting document");

        send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    /// Fetch one page of a collection listing.
    ///
    /// # Errors
    ///
    /// Returns the backend/transport status on failure.
    pub async fn list_documents(
        &self,
        collection: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, Status> {
        let url = self.url(collection, None)?;
        let page_size = self.config.page_size.to_string();
        let mut params = vec![("pageSize", page_size.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        tracing::debug!(collection, has_token = page_token.is_some(), "Listing documents");

        let response = send(self.request(Method::GET, url).query(&params)).await?;
        decode(response).await
    }

    /// Run a structured query against `collection` and collect the matching
    /// documents.
    ///
    /// For a subcollection path the query is posted to the parent document,
    /// `{root}/users/u1:runQuery` for `users/u1/orders`.
    ///
    /// # Errors
    ///
    /// Returns the backend/transport status on failure.
    pub async fn run_query(
        &self,
        collection: &str,
        query: &StructuredQuery,
    ) -> Result<Vec<Document>, Status> {
        let url = self.run_query_url(collection)?;
        tracing::debug!(collection, "Running query");

        let body = RunQueryRequest {
            structured_query: query,
        };
        let response = send(self.request(Method::POST, url).json(&body)).await?;

        let results: Vec<RunQueryResponse> = decode(response).await?;
        Ok(results.into_iter().filter_map(|r| r.document).collect())
    }
}

/// Split a collection path into its segments.
///
/// A collection path has an odd number of non-empty segments:
/// `users`, `users/u1/orders`.
fn collection_segments(collection: &str) -> Result<Vec<&str>, Status> {
    let segments: Vec<&str> = collection.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) || segments.len() % 2 == 0 {
        return Err(Status::new(
            Code::InvalidArgument,
            format!("invalid collection path {collection:?}"),
        ));
    }
    Ok(segments)
}

fn parse_base(url: &str) -> Result<Url, ConnectError> {
    let parsed = Url::parse(url).map_err(|e| ConnectError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() {
        return Err(ConnectError::InvalidUrl {
            url: url.to_string(),
            reason: "not a base URL".to_string(),
        });
    }
    Ok(parsed)
}

/// Send a request, turning transport failures and non-2xx responses into a
/// `Status`.
async fn send(builder: RequestBuilder) -> Result<Response, Status> {
    let response = builder.send().await.map_err(transport_status)?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_status(status.as_u16(), &body))
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, Status> {
    response
        .json()
        .await
        .map_err(|e| Status::new(Code::Internal, format!("failed to decode response: {e}")))
}

fn transport_status(error: reqwest::Error) -> Status {
    let code = if error.is_timeout() {
        Code::DeadlineExceeded
    } else {
        Code::Unavailable
    };
    Status::new(code, error.to_string())
}

/// Parse a Google error envelope, falling back to the HTTP status.
///
/// `runQuery` wraps the envelope in a one-element array.
fn error_status(http_status: u16, body: &str) -> Status {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok().or_else(|| {
        serde_json::from_str::<Vec<ErrorEnvelope>>(body)
            .ok()
            .and_then(|mut v| v.pop())
    });

    match envelope {
        Some(ErrorEnvelope { error }) => {
            let code = error
                .status
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| Code::from_http(http_status));
            Status::new(code, error.message)
        }
        None => Status::new(
            Code::from_http(http_status),
            format!("HTTP {http_status}"),
        ),
    }
}
