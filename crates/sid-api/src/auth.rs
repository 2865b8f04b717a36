//! Bearer token authentication.
//!
//! Every REST route except health checks resolves an [`AuthUser`] before it
//! touches a frame or the record store. Tokens are checked by a chain of
//! [`TokenVerifier`]s: fixed development/device tokens first, then Firebase
//! ID tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Google JWKS URL for Firebase Auth.
pub const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Firebase token issuer prefix.
const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum spacing between refreshes triggered by an unknown key id.
const JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
        }
    }
}

/// Resolves a bearer token to a user or rejects it.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> ApiResult<AuthUser>;
}

/// Fixed token to user table (`AUTH_STATIC_TOKENS`).
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> ApiResult<AuthUser> {
        self.tokens
            .get(token)
            .map(|uid| AuthUser::new(uid.clone()))
            .ok_or_else(|| ApiError::unauthorized("Invalid token"))
    }
}

/// Decoded Firebase ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseClaims {
    /// User ID
    pub sub: String,
    pub email: Option<String>,
    pub iss: String,
    /// Firebase project ID
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl From<FirebaseClaims> for AuthUser {
    fn from(claims: FirebaseClaims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

/// Firebase ID token verifier backed by a lazily fetched JWKS cache.
pub struct FirebaseTokenVerifier {
    http: Client,
    jwks_url: String,
    project_id: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: RwLock<Option<Instant>>,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: impl Into<String>) -> ApiResult<Self> {
        Self::with_jwks_url(project_id, GOOGLE_JWKS_URL)
    }

    pub fn with_jwks_url(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
    ) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::internal(format!("Failed to build JWKS client: {}", e)))?;

        Ok(Self {
            http,
            jwks_url: jwks_url.into(),
            project_id: project_id.into(),
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        })
    }

    async fn refresh_keys(&self) -> Result<(), String> {
        debug!("Refreshing JWKS keys");
        // Recorded up front so a failing endpoint is not hammered.
        *self.last_refresh.write().await = Some(Instant::now());

        let jwks: JwksResponse = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!(kid = %jwk.kid, error = %e, "Skipping malformed JWK"),
            }
        }

        debug!("Refreshed {} JWKS keys", keys.len());
        *self.keys.write().await = keys;
        Ok(())
    }

    async fn refreshed_since(&self, window: Duration) -> bool {
        matches!(*self.last_refresh.read().await, Some(at) if at.elapsed() < window)
    }

    async fn get_key(&self, kid: &str) -> Option<DecodingKey> {
        if !self.refreshed_since(JWKS_CACHE_TTL).await {
            if let Err(e) = self.refresh_keys().await {
                warn!("Failed to refresh JWKS keys: {}", e);
            }
        }

        if let Some(key) = self.keys.read().await.get(kid).cloned() {
            return Some(key);
        }

        // Google rotates keys; an unknown kid may be brand new.
        if !self.refreshed_since(JWKS_MIN_REFRESH_INTERVAL).await {
            if let Err(e) = self.refresh_keys().await {
                warn!("Failed to refresh JWKS keys: {}", e);
            }
        }
        self.keys.read().await.get(kid).cloned()
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> ApiResult<AuthUser> {
        let header = decode_header(token)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token header: {}", e)))?;

        if header.alg != Algorithm::RS256 {
            return Err(ApiError::unauthorized("Unsupported token algorithm"));
        }

        let kid = header
            .kid
            .ok_or_else(|| ApiError::unauthorized("Token missing key ID"))?;

        let key = self
            .get_key(&kid)
            .await
            .ok_or_else(|| ApiError::unauthorized("Unknown key ID"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)]);
        validation.set_audience(&[&self.project_id]);

        let token_data = decode::<FirebaseClaims>(token, &key, &validation)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

        Ok(token_data.claims.into())
    }
}

/// Tries each verifier in order; the first acceptance wins.
pub struct VerifierChain {
    verifiers: Vec<Arc<dyn TokenVerifier>>,
}

impl VerifierChain {
    pub fn new(verifiers: Vec<Arc<dyn TokenVerifier>>) -> Self {
        Self { verifiers }
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for VerifierChain {
    async fn verify(&self, token: &str) -> ApiResult<AuthUser> {
        let mut last_err = ApiError::unauthorized("No token verifier configured");
        for verifier in &self.verifiers {
            match verifier.verify(token).await {
                Ok(user) => return Ok(user),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

fn bearer_token(parts: &Parts) -> ApiResult<&str> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user = state.verifier.verify(token).await?;
        debug!(user_id = %user.uid, "Authenticated request");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Header `{"alg":"RS256","kid":"k1","typ":"JWT"}`, payload `{"sub":"u1"}`.
    const RS256_UNKNOWN_KID: &str =
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIiwidHlwIjoiSldUIn0.eyJzdWIiOiJ1MSJ9.c2ln";

    fn static_verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(HashMap::from([(
            "test_token".to_string(),
            "test_user_123".to_string(),
        )]))
    }

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/events");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = static_verifier();
        assert_eq!(
            verifier.verify("test_token").await.unwrap(),
            AuthUser::new("test_user_123")
        );
        assert!(matches!(
            verifier.verify("nope").await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))).unwrap(), "abc");
        assert!(bearer_token(&parts_with(None)).is_err());
        assert!(bearer_token(&parts_with(Some("Basic abc"))).is_err());
        assert!(bearer_token(&parts_with(Some("Bearer   "))).is_err());
    }

    #[tokio::test]
    async fn test_firebase_rejects_non_rs256_without_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
            .expect(0)
            .mount(&server)
            .await;

        let verifier = FirebaseTokenVerifier::with_jwks_url("proj", server.uri()).unwrap();
        let forged = encode(
            &Header::default(),
            &serde_json::json!({"sub": "mallory", "exp": 4_102_444_800i64}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(matches!(
            verifier.verify(&forged).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_is_throttled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
            .expect(1)
            .mount(&server)
            .await;

        let verifier =
            FirebaseTokenVerifier::with_jwks_url("proj", format!("{}/jwks", server.uri())).unwrap();

        for _ in 0..3 {
            let err = verifier.verify(RS256_UNKNOWN_KID).await.unwrap_err();
            assert!(err.to_string().contains("Unknown key ID"));
        }
    }

    #[tokio::test]
    async fn test_chain_tries_in_order() {
        let chain = VerifierChain::new(vec![
            Arc::new(StaticTokenVerifier::new(HashMap::new())),
            Arc::new(static_verifier()),
        ]);
        assert_eq!(chain.verify("test_token").await.unwrap().uid, "test_user_123");
        assert!(chain.verify("other").await.is_err());

        let empty = VerifierChain::new(Vec::new());
        assert!(empty.is_empty());
        assert!(matches!(
            empty.verify("test_token").await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
