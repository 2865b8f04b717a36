//! Repository for enrolled identities (`whitelist` collection, one document
//! per identity).

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use sid_models::WhitelistEntry;

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_parse_failure;
use crate::types::{Document, ToFirestoreValue, Value};

pub const WHITELIST_COLLECTION: &str = "whitelist";

#[derive(Clone)]
pub struct WhitelistRepository {
    client: FirestoreClient,
}

impl WhitelistRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Create or replace the entry for `entry.identity`.
    pub async fn upsert(&self, entry: &WhitelistEntry) -> FirestoreResult<()> {
        let fields = entry_to_fields(entry);
        self.client
            .with_retry("upsert_whitelist", || {
                self.client
                    .set_document(WHITELIST_COLLECTION, &entry.identity, fields.clone())
            })
            .await?;
        info!(identity = %entry.identity, dim = entry.embedding.len(), "Stored whitelist entry");
        Ok(())
    }

    pub async fn list(&self) -> FirestoreResult<Vec<WhitelistEntry>> {
        let docs = self
            .client
            .with_retry("list_whitelist", || self.client.list_all_documents(WHITELIST_COLLECTION))
            .await?;

        Ok(docs
            .iter()
            .filter_map(|doc| match document_to_entry(doc) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(doc = ?doc.name, error = %e, "Skipping unreadable whitelist document");
                    record_parse_failure(WHITELIST_COLLECTION);
                    None
                }
            })
            .collect())
    }
}

fn entry_to_fields(entry: &WhitelistEntry) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("identity".to_string(), entry.identity.to_firestore_value());
    fields.insert("embedding".to_string(), entry.embedding.to_firestore_value());
    fields.insert(
        "created_at".to_string(),
        entry.created_at.unwrap_or_else(Utc::now).to_firestore_value(),
    );
    fields
}

fn document_to_entry(doc: &Document) -> FirestoreResult<WhitelistEntry> {
    let identity: String = doc
        .get("identity")
        .or_else(|| doc.id().map(str::to_string))
        .ok_or_else(|| FirestoreError::invalid_document("whitelist entry has no identity"))?;
    let embedding: Vec<f32> = doc
        .get("embedding")
        .filter(|e: &Vec<f32>| !e.is_empty())
        .ok_or_else(|| FirestoreError::invalid_document(format!("{identity}: missing embedding")))?;

    Ok(WhitelistEntry {
        identity,
        embedding,
        created_at: doc.get("created_at"),
    })
}
