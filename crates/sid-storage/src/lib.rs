//! Evidence storage.
//!
//! This crate provides:
//! - The [`BlobStore`] seam used by the persistence path
//! - A Cloudflare R2 (S3 API) implementation that uploads annotated frames
//!   and hands back a durable URL

pub mod blob;
pub mod client;
pub mod error;

pub use blob::BlobStore;
pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
