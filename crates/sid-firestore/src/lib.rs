//! Firestore persistence for detection events, regions of interest and the
//! face whitelist.
//!
//! - REST client with service-account token caching (or an emulator)
//! - Retry with jittered exponential backoff
//! - Typed repositories per collection
//! - [`RecordStore`], the trait the API is written against

pub mod client;
pub mod error;
pub mod event_repo;
pub mod metrics;
pub mod retry;
pub mod roi_repo;
pub mod store;
pub mod token_cache;
pub mod types;
pub mod whitelist_repo;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use event_repo::{EventQuery, EventRepository};
pub use roi_repo::RoiRepository;
pub use store::{FirestoreRecordStore, RecordStore};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
pub use whitelist_repo::WhitelistRepository;
