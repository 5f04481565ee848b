use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use crate::db::store::IdentityStore;
use crate::errors::{FaceIdError, FaceIdResult};
use crate::models::identity::{RegistrationOutcome, VerificationResult};
use crate::pipeline::extractor::{decode_image, Deadline, EmbeddingExtractor};
use crate::pipeline::similarity::{cosine_similarity, is_match, mean_embedding, DEFAULT_MATCH_THRESHOLD};
use crate::stats::Stats;

pub const MAX_USERNAME_LEN: usize = 128;
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Trimmed username, or `InvalidUsername` when it is empty, too long or
/// contains control characters.
pub fn normalize_username(raw: &str) -> FaceIdResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(FaceIdError::InvalidUsername("username must not be empty".into()));
    }
    if name.chars().count() > MAX_USERNAME_LEN {
        return Err(FaceIdError::InvalidUsername(format!(
            "username longer than {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(FaceIdError::InvalidUsername("username contains control characters".into()));
    }
    Ok(name.to_string())
}

/// Registration and verification over one extractor and one identity store.
pub struct VerificationEngine {
    extractor: Arc<dyn EmbeddingExtractor>,
    store: IdentityStore,
    stats: Arc<Stats>,
    threshold: f64,
    extract_timeout: Duration,
}

impl VerificationEngine {
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>, store: IdentityStore, stats: Arc<Stats>) -> Self {
        Self {
            extractor,
            store,
            stats,
            threshold: DEFAULT_MATCH_THRESHOLD,
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub fn store(&self) -> &IdentityStore { &self.store }
    pub fn extractor(&self) -> &Arc<dyn EmbeddingExtractor> { &self.extractor }
    pub fn stats(&self) -> &Arc<Stats> { &self.stats }
    pub fn threshold(&self) -> f64 { self.threshold }

    /// Decode and embed one image on a blocking thread, bounded by the
    /// extraction timeout. A timeout is reported as an extraction failure,
    /// and the blocking job stops at its next deadline check instead of
    /// finishing work nobody is waiting for.
    pub async fn extract(&self, image: Bytes) -> FaceIdResult<Vec<f32>> {
        let extractor = self.extractor.clone();
        let deadline = Deadline::after(self.extract_timeout);
        let task = tokio::task::spawn_blocking(move || {
            deadline.check()?;
            let img = decode_image(&image)?;
            extractor.extract_within(&img, &deadline)
        });
        match tokio::time::timeout(self.extract_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(FaceIdError::Internal(format!("extraction task failed: {}", e))),
            Err(_) => Err(FaceIdError::ExtractionTimeout {
                millis: self.extract_timeout.as_millis() as u64,
            }),
        }
    }

    /// Enroll `username` from two samples. Nothing is written unless both
    /// samples yield an embedding.
    pub async fn register(&self, username: &str, image1: Bytes, image2: Bytes) -> FaceIdResult<RegistrationOutcome> {
        let username = normalize_username(username)?;
        match self.register_samples(&username, image1, image2).await {
            Ok(outcome) => {
                self.stats.record_registration(outcome.outcome);
                info!("Registered {} ({:?}, dim={})", username, outcome.outcome, outcome.dim);
                Ok(outcome)
            }
            Err(e) => {
                self.stats.record_registration_failure();
                if e.is_extraction_failure() {
                    self.stats.record_extraction_failure();
                }
                warn!("Registration for {} failed: {}", username, e);
                Err(e)
            }
        }
    }

    async fn register_samples(&self, username: &str, image1: Bytes, image2: Bytes) -> FaceIdResult<RegistrationOutcome> {
        let (first, second) = tokio::try_join!(self.extract(image1), self.extract(image2))?;
        let encoding = mean_embedding(&first, &second)?;
        let dim = encoding.len();
        let outcome = self.store.upsert(username, encoding).await?;
        Ok(RegistrationOutcome {
            username: username.to_string(),
            message: format!("{} registered successfully.", username),
            outcome,
            dim,
        })
    }

    /// Compare a live sample against the stored reference. Unknown users and
    /// unusable images are ordinary negative results; only service faults
    /// (store, model) come back as `Err`.
    pub async fn verify(&self, username: &str, live_image: Bytes) -> FaceIdResult<VerificationResult> {
        let username = normalize_username(username)?;
        let Some(record) = self.store.get(&username).await? else {
            self.stats.record_unknown_user();
            info!("Verification for unknown user {}", username);
            return Ok(VerificationResult::user_not_found());
        };

        let live = match self.extract(live_image).await {
            Ok(v) => v,
            Err(e) if e.is_extraction_failure() => {
                self.stats.record_extraction_failure();
                warn!("Verification for {}: extraction failed: {}", username, e);
                return Ok(VerificationResult::failed(e.public_message()));
            }
            Err(e) => return Err(e),
        };

        let similarity = match cosine_similarity(&record.encoding, &live) {
            Ok(s) => s,
            Err(e) => {
                self.stats.record_scoring_failure();
                warn!("Verification for {}: cannot score: {}", username, e);
                return Ok(VerificationResult::failed(e.public_message()));
            }
        };
        let verified = is_match(similarity, self.threshold);
        self.stats.record_decision(verified);
        info!(
            "Verification for {}: similarity={:.4} threshold={} verified={}",
            username, similarity, self.threshold, verified
        );
        Ok(VerificationResult::decided(similarity, verified))
    }
}
