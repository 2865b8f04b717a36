//! API configuration.

use std::collections::HashMap;
use std::time::Duration;

use sid_models::DEFAULT_PLACEHOLDER_BASE_URL;
use tracing::warn;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Pending persistence jobs held before new ones are dropped
    pub persist_queue_capacity: usize,
    /// How long shutdown waits for queued persistence jobs
    pub persist_drain_timeout: Duration,
    /// Per-subscriber send timeout for broadcasts
    pub broadcast_send_timeout: Duration,
    /// Pending announcements held before new ones are dropped
    pub announce_queue_capacity: usize,
    /// Base of the image URL returned before storage confirms an upload
    pub placeholder_base_url: String,
    /// Fixed bearer token to user id table
    pub static_tokens: HashMap<String, String>,
    /// Firebase project used to validate ID token audience/issuer
    pub firebase_project_id: Option<String>,
    /// Enables the cross-worker relay
    pub redis_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 10 * 1024 * 1024, // 10MB
            environment: "development".to_string(),
            persist_queue_capacity: 64,
            persist_drain_timeout: Duration::from_secs(10),
            broadcast_send_timeout: Duration::from_secs(5),
            announce_queue_capacity: 64,
            placeholder_base_url: DEFAULT_PLACEHOLDER_BASE_URL.to_string(),
            static_tokens: HashMap::new(),
            firebase_project_id: None,
            redis_url: None,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_burst),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            persist_queue_capacity: std::env::var("PERSIST_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.persist_queue_capacity),
            persist_drain_timeout: std::env::var("PERSIST_DRAIN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.persist_drain_timeout),
            broadcast_send_timeout: std::env::var("BROADCAST_SEND_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.broadcast_send_timeout),
            announce_queue_capacity: std::env::var("ANNOUNCE_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.announce_queue_capacity),
            placeholder_base_url: std::env::var("PLACEHOLDER_IMAGE_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.placeholder_base_url),
            static_tokens: std::env::var("AUTH_STATIC_TOKENS")
                .map(|s| parse_static_tokens(&s))
                .unwrap_or_default(),
            firebase_project_id: std::env::var("FIREBASE_PROJECT_ID")
                .or_else(|_| std::env::var("GCP_PROJECT_ID"))
                .ok()
                .filter(|s| !s.trim().is_empty()),
            redis_url: std::env::var("REDIS_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

/// Parse `token:user,token:user`. Malformed pairs are skipped.
pub fn parse_static_tokens(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once(':') {
            Some((token, user)) if !token.trim().is_empty() && !user.trim().is_empty() => {
                Some((token.trim().to_string(), user.trim().to_string()))
            }
            _ => {
                warn!("Ignoring malformed AUTH_STATIC_TOKENS entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_static_tokens() {
        let tokens = parse_static_tokens("test_token:test_user_123, dev:edge-cam ,broken,:nouser");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens["test_token"], "test_user_123");
        assert_eq!(tokens["dev"], "edge-cam");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("PERSIST_QUEUE_CAPACITY", "8");
        std::env::set_var("BROADCAST_SEND_TIMEOUT_SECS", "2");
        std::env::set_var("ANNOUNCE_QUEUE_CAPACITY", "16");
        std::env::set_var("REDIS_URL", "  ");

        let config = ApiConfig::from_env();
        assert_eq!(config.persist_queue_capacity, 8);
        assert_eq!(config.broadcast_send_timeout, Duration::from_secs(2));
        assert_eq!(config.announce_queue_capacity, 16);
        assert!(config.redis_url.is_none());

        std::env::remove_var("PERSIST_QUEUE_CAPACITY");
        std::env::remove_var("BROADCAST_SEND_TIMEOUT_SECS");
        std::env::remove_var("ANNOUNCE_QUEUE_CAPACITY");
        std::env::remove_var("REDIS_URL");
    }

    #[test]
    #[serial]
    fn test_zero_queue_capacity_falls_back() {
        std::env::set_var("PERSIST_QUEUE_CAPACITY", "0");
        assert_eq!(ApiConfig::from_env().persist_queue_capacity, 64);
        std::env::remove_var("PERSIST_QUEUE_CAPACITY");
    }
}
