//! Whitelist seeding from a directory of sample images.
//!
//! Layout: one sub-directory per identity, each holding sample photos.

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::matcher::{EnrollReport, FaceMatcher};
use crate::error::VisionResult;
use crate::frame::decode_frame;

/// File extensions read as samples (case-insensitive).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Samples gathered for one identity.
#[derive(Debug, Clone)]
pub struct DatasetIdentity {
    pub identity: String,
    pub samples: Vec<RgbImage>,
}

/// Read every identity folder under `root`, sorted by identity.
///
/// Unreadable or undecodable files are skipped with a warning. Identities
/// with no decodable sample are omitted.
pub fn load_dataset(root: &Path) -> VisionResult<Vec<DatasetIdentity>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut identities = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let Some(identity) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_sample(p))
            .collect();
        files.sort();

        let samples: Vec<RgbImage> = files
            .iter()
            .filter_map(|path| match std::fs::read(path).map(|b| decode_frame(&b)) {
                Ok(Ok(img)) => Some(img),
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Skipping undecodable sample");
                    None
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable sample");
                    None
                }
            })
            .collect();

        if samples.is_empty() {
            warn!(identity = %identity, "No usable samples for identity");
            continue;
        }

        debug!(identity = %identity, samples = samples.len(), "Loaded identity samples");
        identities.push(DatasetIdentity { identity, samples });
    }

    Ok(identities)
}

/// Enroll every identity found under `root` into `matcher`.
///
/// Identities whose samples contain no face are logged and skipped.
pub fn enroll_dataset(matcher: &FaceMatcher, root: &Path) -> VisionResult<Vec<EnrollReport>> {
    let mut reports = Vec::new();
    for entry in load_dataset(root)? {
        match matcher.enroll(&entry.identity, &entry.samples) {
            Ok(report) => {
                info!(
                    identity = %report.identity,
                    used = report.samples_used,
                    skipped = report.samples_skipped,
                    "Enrolled identity from dataset"
                );
                reports.push(report);
            }
            Err(e) => warn!(identity = %entry.identity, error = %e, "Failed to enroll identity"),
        }
    }
    Ok(reports)
}

fn is_sample(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}
