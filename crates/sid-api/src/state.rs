//! Application state.

use std::path::PathBuf;
use std::sync::Arc;

use sid_firestore::{FirestoreRecordStore, RecordStore};
use sid_relay::EventRelay;
use sid_storage::{BlobStore, R2Client};
use sid_vision::{DetectionPipeline, VisionConfig};
use tracing::{info, warn};

use crate::auth::{FirebaseTokenVerifier, StaticTokenVerifier, TokenVerifier, VerifierChain};
use crate::config::ApiConfig;
use crate::services::{load_whitelist, Announcer, BroadcastHub, PersistenceDecoupler};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Arc<DetectionPipeline>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// `None` disables every store-backed route (503)
    pub records: Option<Arc<dyn RecordStore>>,
    pub blobs: Option<Arc<dyn BlobStore>>,
    pub hub: Arc<BroadcastHub>,
    pub persistence: PersistenceDecoupler,
    /// Cross-worker fan-out; local-only broadcast when `None`
    pub relay: Option<Arc<EventRelay>>,
    pub announcer: Announcer,
}

impl AppState {
    /// Build state from the environment: load models, connect stores, seed
    /// the whitelist and start the persistence worker.
    ///
    /// Missing models or stores degrade functionality and are logged; they do
    /// not fail startup.
    pub async fn new(config: ApiConfig, vision: VisionConfig) -> anyhow::Result<Self> {
        let vision_for_load = vision.clone();
        let pipeline =
            tokio::task::spawn_blocking(move || DetectionPipeline::from_config(&vision_for_load))
                .await?;
        let pipeline = Arc::new(pipeline);

        let records: Option<Arc<dyn RecordStore>> = match FirestoreRecordStore::from_env().await {
            Ok(store) => {
                info!("Firestore record store configured");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!(error = %e, "Firestore unavailable, event/ROI routes will answer 503");
                None
            }
        };

        let blobs: Option<Arc<dyn BlobStore>> = match R2Client::from_env().await {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "R2 storage unavailable, evidence frames will not be uploaded");
                None
            }
        };

        let relay = match config.redis_url.as_deref() {
            Some(url) => match EventRelay::new(url) {
                Ok(relay) => {
                    info!(channel = relay.channel(), "Cross-worker relay enabled");
                    Some(Arc::new(relay))
                }
                Err(e) => {
                    warn!(error = %e, "Invalid REDIS_URL, broadcasting to local subscribers only");
                    None
                }
            },
            None => None,
        };

        if let Some(matcher) = pipeline.matcher() {
            load_whitelist(
                Arc::clone(matcher),
                records.clone(),
                vision.whitelist_dataset_dir.map(PathBuf::from),
            )
            .await;
        }

        let verifier = Arc::new(build_verifier(&config)?);

        let mut state = Self::from_parts(config, pipeline, verifier);
        state.records = records;
        state.blobs = blobs;
        if let Some(relay) = relay {
            state = state.with_relay(relay);
        }
        Ok(state.start_persistence())
    }

    /// State with no stores, no relay and persistence disabled. Announcements
    /// go to the local hub.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_parts(
        config: ApiConfig,
        pipeline: Arc<DetectionPipeline>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new(config.broadcast_send_timeout));
        let announcer = Announcer::spawn(Arc::clone(&hub), None, config.announce_queue_capacity);
        Self {
            config,
            pipeline,
            verifier,
            records: None,
            blobs: None,
            hub,
            persistence: PersistenceDecoupler::disabled(),
            relay: None,
            announcer,
        }
    }

    pub fn with_records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Announce through `relay` instead of the local hub.
    pub fn with_relay(mut self, relay: Arc<EventRelay>) -> Self {
        self.announcer = Announcer::spawn(
            Arc::clone(&self.hub),
            Some(Arc::clone(&relay)),
            self.config.announce_queue_capacity,
        );
        self.relay = Some(relay);
        self
    }

    /// Spawn the persistence worker when both stores are present.
    pub fn start_persistence(mut self) -> Self {
        self.persistence = match (&self.blobs, &self.records) {
            (Some(blobs), Some(records)) => PersistenceDecoupler::spawn(
                Arc::clone(blobs),
                Arc::clone(records),
                self.config.persist_queue_capacity,
            ),
            _ => {
                warn!("Persistence disabled, events are returned but not stored");
                PersistenceDecoupler::disabled()
            }
        };
        self
    }
}

/// Static tokens first, then Firebase when a project is configured.
fn build_verifier(config: &ApiConfig) -> anyhow::Result<VerifierChain> {
    let mut verifiers: Vec<Arc<dyn TokenVerifier>> = Vec::new();

    let static_tokens = StaticTokenVerifier::new(config.static_tokens.clone());
    if !static_tokens.is_empty() {
        if config.is_production() {
            warn!("AUTH_STATIC_TOKENS is set in production");
        }
        verifiers.push(Arc::new(static_tokens));
    }

    if let Some(project_id) = config.firebase_project_id.as_deref() {
        let firebase = FirebaseTokenVerifier::new(project_id)
            .map_err(|e| anyhow::anyhow!("Failed to create Firebase verifier: {}", e))?;
        verifiers.push(Arc::new(firebase));
    }

    if verifiers.is_empty() {
        warn!("No token verifier configured, authenticated routes will reject every request");
    }
    Ok(VerifierChain::new(verifiers))
}
