//! Whitelist loading and enrollment.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use sid_firestore::RecordStore;
use sid_models::WhitelistEntry;
use sid_vision::face::{enroll_dataset, EnrollReport};
use sid_vision::{FaceMatcher, VisionError};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};

/// Counts from a startup load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WhitelistLoadReport {
    /// Entries restored from the record store
    pub restored: usize,
    /// Identities enrolled from the dataset directory
    pub enrolled: usize,
}

/// Result of an HTTP enrollment.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub report: EnrollReport,
    /// Whether the centroid reached the record store
    pub persisted: bool,
}

/// Seed `matcher` from persisted entries, then from a dataset directory.
///
/// Dataset enrollment replaces a persisted entry with the same identity and
/// writes the new centroid back to the store. Every failure here is logged
/// and skipped; an empty whitelist only means every face is unknown.
pub async fn load_whitelist(
    matcher: Arc<FaceMatcher>,
    records: Option<Arc<dyn RecordStore>>,
    dataset_dir: Option<PathBuf>,
) -> WhitelistLoadReport {
    let mut report = WhitelistLoadReport::default();

    if let Some(records) = records.as_ref() {
        match records.list_whitelist().await {
            Ok(entries) => {
                for entry in entries {
                    match matcher.insert(&entry.identity, entry.embedding) {
                        Ok(()) => report.restored += 1,
                        Err(e) => {
                            warn!(identity = %entry.identity, error = %e, "Skipping stored whitelist entry")
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to load stored whitelist"),
        }
    }

    if let Some(dir) = dataset_dir {
        if !dir.is_dir() {
            warn!(path = %dir.display(), "Whitelist dataset directory not found");
        } else {
            let blocking_matcher = Arc::clone(&matcher);
            let enrolled =
                tokio::task::spawn_blocking(move || enroll_dataset(&blocking_matcher, &dir)).await;
            match enrolled {
                Ok(Ok(reports)) => {
                    report.enrolled = reports.len();
                    if let Some(records) = records.as_ref() {
                        for r in &reports {
                            persist(records.as_ref(), r).await;
                        }
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Failed to read whitelist dataset"),
                Err(e) => warn!(error = %e, "Whitelist dataset task failed"),
            }
        }
    }

    info!(
        restored = report.restored,
        enrolled = report.enrolled,
        total = matcher.len(),
        "Whitelist loaded"
    );
    report
}

/// Enroll `identity` from uploaded samples and persist the centroid.
pub async fn enroll_identity(
    matcher: Arc<FaceMatcher>,
    records: Option<Arc<dyn RecordStore>>,
    identity: String,
    samples: Vec<RgbImage>,
) -> ApiResult<EnrollOutcome> {
    let report = tokio::task::spawn_blocking(move || matcher.enroll(&identity, &samples))
        .await?
        .map_err(|e| match e {
            VisionError::NoUsableSamples(_)
            | VisionError::EmbeddingDimension { .. }
            | VisionError::ReservedIdentity(_) => ApiError::bad_request(e.to_string()),
            other => ApiError::internal(other.to_string()),
        })?;

    info!(
        identity = %report.identity,
        used = report.samples_used,
        skipped = report.samples_skipped,
        "Identity enrolled"
    );

    let persisted = match records {
        Some(records) => persist(records.as_ref(), &report).await,
        None => false,
    };

    Ok(EnrollOutcome { report, persisted })
}

async fn persist(records: &dyn RecordStore, report: &EnrollReport) -> bool {
    let entry = WhitelistEntry::new(report.identity.clone(), report.centroid.clone());
    match records.put_whitelist(&entry).await {
        Ok(()) => true,
        Err(e) => {
            warn!(identity = %report.identity, error = %e, "Failed to persist whitelist entry");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryRecordStore;
    use image::Rgb;
    use sid_models::BoundingBox;
    use sid_vision::{FaceEmbedder, FaceLocator, VisionResult};

    struct WholeCropLocator;

    impl FaceLocator for WholeCropLocator {
        fn locate(&self, crop: &RgbImage) -> VisionResult<Vec<BoundingBox>> {
            Ok(vec![BoundingBox::new(0.0, 0.0, crop.width() as f32, crop.height() as f32)])
        }
    }

    /// Embeds a face as its mean (red, green).
    struct ColourEmbedder;

    impl FaceEmbedder for ColourEmbedder {
        fn embed(&self, face: &RgbImage) -> VisionResult<Vec<f32>> {
            let n = (face.width() * face.height()) as f32;
            let (r, g) = face
                .pixels()
                .fold((0.0, 0.0), |(r, g), p| (r + p[0] as f32, g + p[1] as f32));
            Ok(vec![r / n, g / n])
        }
    }

    fn matcher() -> Arc<FaceMatcher> {
        Arc::new(FaceMatcher::new(
            Arc::new(WholeCropLocator),
            Arc::new(ColourEmbedder),
            0.6,
        ))
    }

    #[tokio::test]
    async fn test_restores_stored_entries() {
        let records = Arc::new(MemoryRecordStore::default());
        records
            .whitelist
            .lock()
            .unwrap()
            .push(WhitelistEntry::new("alice", vec![1.0, 0.0]));

        let matcher = matcher();
        let report = load_whitelist(matcher.clone(), Some(records), None).await;
        assert_eq!(report, WhitelistLoadReport { restored: 1, enrolled: 0 });
        assert_eq!(matcher.identities(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_enroll_identity_persists_centroid() {
        let records = Arc::new(MemoryRecordStore::default());
        let samples = vec![
            RgbImage::from_pixel(8, 8, Rgb([200, 0, 0])),
            RgbImage::from_pixel(8, 8, Rgb([0, 200, 0])),
        ];

        let outcome = enroll_identity(matcher(), Some(records.clone()), "bob".into(), samples)
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.report.samples_used, 2);

        let stored = records.whitelist.lock().unwrap();
        assert_eq!(stored[0].identity, "bob");
        assert!((stored[0].embedding[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!((stored[0].embedding[1] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let records = Arc::new(MemoryRecordStore::failing());
        let samples = vec![RgbImage::from_pixel(8, 8, Rgb([200, 10, 0]))];

        let outcome = enroll_identity(matcher(), Some(records), "carol".into(), samples)
            .await
            .unwrap();
        assert!(!outcome.persisted);
    }

    #[tokio::test]
    async fn test_no_samples_is_bad_request() {
        let err = enroll_identity(matcher(), None, "dave".into(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_reserved_identity_is_bad_request() {
        let records = Arc::new(MemoryRecordStore::default());
        let samples = vec![RgbImage::from_pixel(8, 8, Rgb([200, 10, 0]))];
        let matcher = matcher();

        let err = enroll_identity(matcher.clone(), Some(records.clone()), "unknown".into(), samples)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(matcher.is_empty());
        assert!(records.whitelist.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_reserved_entry_is_skipped() {
        let records = Arc::new(MemoryRecordStore::default());
        {
            let mut stored = records.whitelist.lock().unwrap();
            stored.push(WhitelistEntry::new("no_face", vec![1.0, 0.0]));
            stored.push(WhitelistEntry::new("alice", vec![0.0, 1.0]));
        }

        let matcher = matcher();
        let report = load_whitelist(matcher.clone(), Some(records), None).await;
        assert_eq!(report, WhitelistLoadReport { restored: 1, enrolled: 0 });
        assert_eq!(matcher.identities(), vec!["alice".to_string()]);
    }
}
