//! Whitelist matching and enrollment.
//!
//! The whitelist maps identity labels to unit-length reference embeddings.
//! Matching is a linear scan scoring every entry by cosine similarity; the
//! running maximum only moves on a strictly greater score, and entries are
//! enumerated in lexicographic order, so ties resolve to the
//! lexicographically smallest identity.
//!
//! TODO: replace the linear scan with an approximate nearest-neighbour index
//! once whitelists grow past a few thousand identities.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use image::RgbImage;
use sid_models::{BoundingBox, MatchResult, NO_FACE, UNKNOWN_IDENTITY};
use tracing::{debug, warn};

use super::{cosine_similarity, l2_normalize, FaceEmbedder, FaceLocator};
use crate::error::{VisionError, VisionResult};
use crate::frame::crop_box;

/// Similarity at or above which a face counts as known.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Outcome of an enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollReport {
    pub identity: String,
    /// Stored unit-length centroid
    pub centroid: Vec<f32>,
    pub samples_used: usize,
    pub samples_skipped: usize,
}

/// Matches person crops against a whitelist of known identities.
pub struct FaceMatcher {
    locator: Arc<dyn FaceLocator>,
    embedder: Arc<dyn FaceEmbedder>,
    threshold: f32,
    whitelist: RwLock<BTreeMap<String, Vec<f32>>>,
}

impl FaceMatcher {
    pub fn new(
        locator: Arc<dyn FaceLocator>,
        embedder: Arc<dyn FaceEmbedder>,
        threshold: f32,
    ) -> Self {
        Self {
            locator,
            embedder,
            threshold,
            whitelist: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match the subject of a person crop.
    ///
    /// Zero faces yields `no_face`. With several faces, the largest is used.
    pub fn match_crop(&self, crop: &RgbImage) -> VisionResult<MatchResult> {
        match self.embed_subject(crop)? {
            Some(embedding) => self.match_embedding(&embedding),
            None => Ok(MatchResult::no_face()),
        }
    }

    /// Score an embedding against every whitelist entry.
    pub fn match_embedding(&self, embedding: &[f32]) -> VisionResult<MatchResult> {
        let mut query = embedding.to_vec();
        l2_normalize(&mut query);

        let whitelist = self
            .whitelist
            .read()
            .map_err(|_| VisionError::internal("Whitelist lock poisoned"))?;

        let mut best: Option<(&str, f32)> = None;
        for (identity, reference) in whitelist.iter() {
            if reference.len() != query.len() {
                return Err(VisionError::EmbeddingDimension {
                    expected: reference.len(),
                    actual: query.len(),
                });
            }
            let similarity = cosine_similarity(&query, reference);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((identity.as_str(), similarity));
            }
        }

        let result = match best {
            Some((identity, similarity)) if similarity >= self.threshold => {
                MatchResult::known(identity, similarity)
            }
            Some((_, similarity)) => MatchResult::unknown(similarity),
            None => MatchResult::unknown(0.0),
        };

        debug!(
            identity = %result.identity,
            similarity = result.similarity,
            is_known = result.is_known,
            "Face matched"
        );
        Ok(result)
    }

    /// Enroll an identity from sample images.
    ///
    /// Samples without a detectable face are skipped with a warning. Fails with
    /// [`VisionError::NoUsableSamples`] when every sample was skipped.
    pub fn enroll(&self, identity: &str, samples: &[RgbImage]) -> VisionResult<EnrollReport> {
        let mut embeddings = Vec::with_capacity(samples.len());
        let mut skipped = 0;

        for (index, sample) in samples.iter().enumerate() {
            match self.embed_subject(sample)? {
                Some(embedding) => embeddings.push(embedding),
                None => {
                    skipped += 1;
                    warn!(identity, sample = index, "No face found in enrollment sample, skipping");
                }
            }
        }

        let used = embeddings.len();
        let centroid = self.enroll_embeddings(identity, embeddings)?;
        Ok(EnrollReport {
            identity: identity.to_string(),
            centroid,
            samples_used: used,
            samples_skipped: skipped,
        })
    }

    /// Store the re-normalized mean of the unit-normalized `embeddings`.
    ///
    /// Replaces any existing entry for `identity`. Returns the stored centroid.
    pub fn enroll_embeddings(
        &self,
        identity: &str,
        embeddings: Vec<Vec<f32>>,
    ) -> VisionResult<Vec<f32>> {
        if is_reserved_identity(identity) {
            return Err(VisionError::ReservedIdentity(identity.to_string()));
        }
        let dim = match embeddings.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(VisionError::NoUsableSamples(identity.to_string())),
        };

        let mut centroid = vec![0.0f32; dim];
        for mut embedding in embeddings.iter().cloned() {
            if embedding.len() != dim {
                return Err(VisionError::EmbeddingDimension {
                    expected: dim,
                    actual: embedding.len(),
                });
            }
            l2_normalize(&mut embedding);
            for (acc, v) in centroid.iter_mut().zip(embedding.iter()) {
                *acc += v;
            }
        }
        let n = embeddings.len() as f32;
        for v in centroid.iter_mut() {
            *v /= n;
        }
        l2_normalize(&mut centroid);

        self.insert(identity, centroid.clone())?;
        Ok(centroid)
    }

    /// Insert a reference embedding as is (after normalization), e.g. when
    /// restoring a persisted whitelist.
    ///
    /// The labels `unknown` and `no_face` are reserved for match results and
    /// rejected with [`VisionError::ReservedIdentity`].
    pub fn insert(&self, identity: &str, mut embedding: Vec<f32>) -> VisionResult<()> {
        if is_reserved_identity(identity) {
            return Err(VisionError::ReservedIdentity(identity.to_string()));
        }
        l2_normalize(&mut embedding);
        let mut whitelist = self
            .whitelist
            .write()
            .map_err(|_| VisionError::internal("Whitelist lock poisoned"))?;
        if let Some((_, other)) = whitelist.iter().find(|(k, _)| k.as_str() != identity) {
            if other.len() != embedding.len() {
                return Err(VisionError::EmbeddingDimension {
                    expected: other.len(),
                    actual: embedding.len(),
                });
            }
        }
        whitelist.insert(identity.to_string(), embedding);
        Ok(())
    }

    /// Enrolled identities in enumeration order.
    pub fn identities(&self) -> Vec<String> {
        self.whitelist
            .read()
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn embedding(&self, identity: &str) -> Option<Vec<f32>> {
        self.whitelist
            .read()
            .ok()
            .and_then(|w| w.get(identity).cloned())
    }

    pub fn len(&self) -> usize {
        self.whitelist.read().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate the largest face in `crop` and return its unit embedding.
    fn embed_subject(&self, crop: &RgbImage) -> VisionResult<Option<Vec<f32>>> {
        let faces = self.locator.locate(crop)?;

        let largest = faces
            .iter()
            .filter(|b| b.is_valid())
            .fold(None, |best: Option<&BoundingBox>, b| match best {
                Some(cur) if cur.area() >= b.area() => Some(cur),
                _ => Some(b),
            });

        let Some(face_box) = largest else {
            return Ok(None);
        };
        let Some(face) = crop_box(crop, face_box) else {
            return Ok(None);
        };

        let mut embedding = self.embedder.embed(&face)?;
        l2_normalize(&mut embedding);
        Ok(Some(embedding))
    }
}

/// Whether `identity` collides with a label a match result can carry.
pub fn is_reserved_identity(identity: &str) -> bool {
    identity == UNKNOWN_IDENTITY || identity == NO_FACE
}
