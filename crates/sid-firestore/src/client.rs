//! Firestore REST API client.
//!
//! Pooled HTTP client, cached service-account tokens with one forced refresh
//! on an expired-token 401, retry helpers, and per-request spans and metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{Document, ListDocumentsResponse, RunQueryRequest, RunQueryResponse, StructuredQuery, Value};

/// Bearer token the Firestore emulator accepts for admin access.
const EMULATOR_TOKEN: &str = "owner";

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a local emulator; skips service-account auth.
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| FirestoreError::auth_error("GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set"))?;
        if project_id.trim().is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let timeout_secs: u64 = std::env::var("FIRESTORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID").unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.trim().is_empty()),
        })
    }

    fn documents_url(&self, origin: &str) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            origin.trim_end_matches('/'),
            self.project_id,
            self.database_id
        )
    }
}

#[derive(Clone)]
enum Auth {
    ServiceAccount(Arc<TokenCache>),
    Emulator,
}

/// Firestore REST API client. Cheap to clone.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    auth: Auth,
}

impl FirestoreClient {
    /// Connect to Firestore, or to the emulator when `emulator_host` is set.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        match config.emulator_host.clone() {
            Some(host) => {
                info!(host = %host, "Using Firestore emulator");
                Self::with_origin(config, &format!("http://{host}"))
            }
            None => {
                let provider = service_account()?;
                let http = build_http(&config)?;
                let base_url = config.documents_url("https://firestore.googleapis.com");
                Ok(Self {
                    http,
                    config,
                    base_url,
                    auth: Auth::ServiceAccount(Arc::new(TokenCache::new(provider))),
                })
            }
        }
    }

    /// Unauthenticated client against an emulator-compatible origin.
    pub fn with_origin(config: FirestoreConfig, origin: &str) -> FirestoreResult<Self> {
        let http = build_http(&config)?;
        let base_url = config.documents_url(origin);
        Ok(Self {
            http,
            config,
            base_url,
            auth: Auth::Emulator,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    async fn token(&self) -> FirestoreResult<String> {
        match &self.auth {
            Auth::ServiceAccount(cache) => cache.get_token().await,
            Auth::Emulator => Ok(EMULATOR_TOKEN.to_string()),
        }
    }

    /// Send an authenticated request, refreshing the token once if Firestore
    /// reports it expired.
    async fn send<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match &self.auth {
            Auth::ServiceAccount(cache) if is_expired_token(&body) => {
                debug!("Firestore token expired, refreshing");
                cache.invalidate().await;
                let token = self.token().await?;
                Ok(build(&token).send().await?)
            }
            _ => Err(FirestoreError::from_http_status(401, body)),
        }
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Get a document; `None` when it does not exist.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);
        self.execute("get_document", collection, Some(doc_id), async {
            let response = self.send(|token| self.http.get(&url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(error_from_response(status, response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` on id collision.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);
        self.execute("create_document", collection, Some(doc_id), async {
            let response = self
                .send(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                status => Err(error_from_response(status, response).await),
            }
        })
        .await
    }

    /// Create or fully replace a document.
    pub async fn set_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = self.document_url(collection, doc_id);
        let body = Document::new(fields);
        self.execute("set_document", collection, Some(doc_id), async {
            let response = self
                .send(|token| self.http.patch(&url).bearer_auth(token).json(&body))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                status => Err(error_from_response(status, response).await),
            }
        })
        .await
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<()> {
        let url = self.document_url(collection, doc_id);
        self.execute("delete_document", collection, Some(doc_id), async {
            let response = self.send(|token| self.http.delete(&url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
                status => Err(error_from_response(status, response).await),
            }
        })
        .await
    }

    /// One page of a collection listing.
    pub async fn list_documents(
        &self,
        collection: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> FirestoreResult<ListDocumentsResponse> {
        let mut params = Vec::new();
        if let Some(size) = page_size {
            params.push(format!("pageSize={size}"));
        }
        if let Some(token) = page_token {
            params.push(format!("pageToken={}", urlencoding::encode(token)));
        }
        let mut url = format!("{}/{}", self.base_url, collection);
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        self.execute("list_documents", collection, None, async {
            let response = self.send(|token| self.http.get(&url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                status => Err(error_from_response(status, response).await),
            }
        })
        .await
    }

    /// Every document in a collection, following page tokens.
    pub async fn list_all_documents(&self, collection: &str) -> FirestoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_documents(collection, Some(300), page_token.as_deref())
                .await?;
            documents.extend(page.documents.unwrap_or_default());
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(documents),
            }
        }
    }

    /// Run a structured query against top-level collections.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.execute("run_query", &collection, None, async {
            let response = self
                .send(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;
            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    let rows: Vec<RunQueryResponse> = serde_json::from_str(&body).map_err(|e| {
                        FirestoreError::request_failed(format!(
                            "Failed to parse runQuery response: {} (body prefix: {})",
                            e,
                            body.chars().take(200).collect::<String>()
                        ))
                    })?;
                    Ok(rows.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(error_from_response(status, response).await),
            }
        })
        .await
    }

    /// Execute with this client's retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    async fn execute<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = doc_id.unwrap_or("")
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_secs_f64() * 1000.0);
        result
    }
}

fn build_http(config: &FirestoreConfig) -> FirestoreResult<Client> {
    Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .user_agent(concat!("sid-firestore/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FirestoreError::Network)
}

fn service_account() -> FirestoreResult<Arc<dyn TokenProvider>> {
    match CustomServiceAccount::from_env() {
        Ok(Some(sa)) => Ok(Arc::new(sa)),
        Ok(None) => Err(FirestoreError::auth_error(
            "GOOGLE_APPLICATION_CREDENTIALS must point at a service account JSON file",
        )),
        Err(e) => Err(FirestoreError::auth_error(format!(
            "Failed to load service account: {e}"
        ))),
    }
}

fn is_expired_token(body: &str) -> bool {
    body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
}

async fn error_from_response(status: StatusCode, response: Response) -> FirestoreError {
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    FirestoreError::from_http_status(status.as_u16(), format!("{url}: {body}"))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
