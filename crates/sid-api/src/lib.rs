//! Axum HTTP API server for intrusion detection.
//!
//! This crate provides:
//! - Frame detection, event history, ROI and whitelist REST routes
//! - The `/ws/detections` real-time stream and its broadcast hub
//! - Background persistence of evidence frames and event records
//! - Bearer token verification (static tokens, Firebase ID tokens)
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;
pub mod ws;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use auth::{AuthUser, StaticTokenVerifier, TokenVerifier, VerifierChain};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{BroadcastHub, PersistenceDecoupler};
pub use state::AppState;
