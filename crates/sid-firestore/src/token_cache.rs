//! Access-token cache for the Firestore service account.
//!
//! Tokens are refreshed a minute before expiry under a write lock, so
//! concurrent callers wait on one refresh instead of stampeding the token
//! endpoint. A failed refresh keeps serving the old token while it is still
//! technically valid.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Used when the provider reports an expiry we cannot convert.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope covering the Firestore REST API.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            slot: RwLock::new(None),
        }
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    pub async fn get_token(&self) -> FirestoreResult<String> {
        if let Some(cached) = self.slot.read().await.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.slot.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.value.clone());
            }
        }

        match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let now = Utc::now();
                let expires_at = if token.expires_at() > now {
                    Instant::now() + (token.expires_at() - now).to_std().unwrap_or(FALLBACK_TTL)
                } else {
                    Instant::now()
                };
                let value = token.as_str().to_string();
                *slot = Some(CachedToken {
                    value: value.clone(),
                    expires_at,
                });
                debug!("Refreshed Firestore access token");
                Ok(value)
            }
            Err(e) => match slot.as_ref() {
                Some(cached) if cached.is_usable() => {
                    warn!(error = %e, "Token refresh failed, reusing current token");
                    Ok(cached.value.clone())
                }
                _ => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain access token: {e}"
                ))),
            },
        }
    }
}
