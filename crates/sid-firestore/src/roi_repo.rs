//! Repository for per-user regions of interest (`rois` collection).

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use sid_models::{RegionOfInterest, StoredRoi};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_parse_failure;
use crate::types::{Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};

pub const ROIS_COLLECTION: &str = "rois";

#[derive(Clone)]
pub struct RoiRepository {
    client: FirestoreClient,
}

impl RoiRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn create(&self, user_id: &str, roi: &RegionOfInterest) -> FirestoreResult<StoredRoi> {
        let stored = StoredRoi {
            roi_id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            roi: roi.clone(),
            active: true,
        };
        self.client
            .create_document(ROIS_COLLECTION, &stored.roi_id, roi_to_fields(&stored))
            .await?;
        info!(roi_id = %stored.roi_id, user_id = %user_id, name = %roi.name, "Created ROI");
        Ok(stored)
    }

    pub async fn list(&self, user_id: &str) -> FirestoreResult<Vec<StoredRoi>> {
        let query = StructuredQuery::collection(ROIS_COLLECTION)
            .where_eq("user_id", user_id.to_firestore_value());
        let docs = self
            .client
            .with_retry("list_rois", || self.client.run_query(query.clone()))
            .await?;

        let mut rois: Vec<StoredRoi> = docs
            .iter()
            .filter_map(|doc| match document_to_roi(doc) {
                Ok(roi) => Some(roi),
                Err(e) => {
                    warn!(doc = ?doc.name, error = %e, "Skipping unreadable ROI document");
                    record_parse_failure(ROIS_COLLECTION);
                    None
                }
            })
            .collect();
        rois.sort_by(|a, b| a.roi.name.cmp(&b.roi.name).then_with(|| a.roi_id.cmp(&b.roi_id)));
        Ok(rois)
    }

    /// Fetch one ROI; `None` when missing or owned by someone else.
    pub async fn get(&self, user_id: &str, roi_id: &str) -> FirestoreResult<Option<StoredRoi>> {
        let doc = self
            .client
            .with_retry("get_roi", || self.client.get_document(ROIS_COLLECTION, roi_id))
            .await?;
        match doc {
            Some(doc) => {
                let roi = document_to_roi(&doc)?;
                Ok((roi.user_id == user_id).then_some(roi))
            }
            None => Ok(None),
        }
    }

    /// Delete an ROI the caller owns. Returns `false` when there was nothing
    /// of theirs to delete.
    pub async fn delete(&self, user_id: &str, roi_id: &str) -> FirestoreResult<bool> {
        if self.get(user_id, roi_id).await?.is_none() {
            return Ok(false);
        }
        self.client.delete_document(ROIS_COLLECTION, roi_id).await?;
        info!(roi_id = %roi_id, user_id = %user_id, "Deleted ROI");
        Ok(true)
    }
}

fn roi_to_fields(stored: &StoredRoi) -> HashMap<String, Value> {
    let mut region = HashMap::new();
    region.insert("x".to_string(), stored.roi.x.to_firestore_value());
    region.insert("y".to_string(), stored.roi.y.to_firestore_value());
    region.insert("width".to_string(), stored.roi.width.to_firestore_value());
    region.insert("height".to_string(), stored.roi.height.to_firestore_value());
    region.insert("name".to_string(), stored.roi.name.to_firestore_value());

    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), stored.user_id.to_firestore_value());
    fields.insert("roi".to_string(), Value::map(region));
    fields.insert("active".to_string(), stored.active.to_firestore_value());
    fields.insert("created_at".to_string(), Utc::now().to_firestore_value());
    fields
}

fn document_to_roi(doc: &Document) -> FirestoreResult<StoredRoi> {
    let roi_id = doc
        .id()
        .ok_or_else(|| FirestoreError::invalid_document("ROI document has no name"))?
        .to_string();
    let invalid = || FirestoreError::invalid_document(format!("ROI {roi_id} is malformed"));

    let region = doc.raw("roi").and_then(Value::as_map).ok_or_else(invalid)?;
    let int = |name: &str| region.get(name).and_then(u32::from_firestore_value);

    let roi = RegionOfInterest {
        x: int("x").ok_or_else(invalid)?,
        y: int("y").ok_or_else(invalid)?,
        width: int("width").ok_or_else(invalid)?,
        height: int("height").ok_or_else(invalid)?,
        name: region
            .get("name")
            .and_then(String::from_firestore_value)
            .unwrap_or_else(|| "default".to_string()),
    };

    Ok(StoredRoi {
        user_id: doc.get("user_id").ok_or_else(invalid)?,
        active: doc.get("active").unwrap_or(true),
        roi,
        roi_id,
    })
}
