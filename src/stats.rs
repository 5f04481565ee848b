use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::models::identity::UpsertOutcome;

pub struct Stats {
    registrations_created: AtomicU64,
    registrations_updated: AtomicU64,
    registration_failures: AtomicU64,
    verifications_granted: AtomicU64,
    verifications_denied: AtomicU64,
    verifications_unknown_user: AtomicU64,
    extraction_failures: AtomicU64,
    scoring_failures: AtomicU64,
    started: Instant,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub registrations_created: u64,
    pub registrations_updated: u64,
    pub registration_failures: u64,
    pub verifications_granted: u64,
    pub verifications_denied: u64,
    pub verifications_unknown_user: u64,
    pub extraction_failures: u64,
    /// Stored and live embeddings could not be compared (e.g. model dimension changed).
    pub scoring_failures: u64,
    pub uptime_secs: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            registrations_created: AtomicU64::new(0),
            registrations_updated: AtomicU64::new(0),
            registration_failures: AtomicU64::new(0),
            verifications_granted: AtomicU64::new(0),
            verifications_denied: AtomicU64::new(0),
            verifications_unknown_user: AtomicU64::new(0),
            extraction_failures: AtomicU64::new(0),
            scoring_failures: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_registration(&self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.registrations_created.fetch_add(1, Ordering::Relaxed),
            UpsertOutcome::Updated => self.registrations_updated.fetch_add(1, Ordering::Relaxed),
        };
    }
    pub fn record_registration_failure(&self) { self.registration_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn record_decision(&self, verified: bool) {
        if verified {
            self.verifications_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.verifications_denied.fetch_add(1, Ordering::Relaxed);
        }
    }
    pub fn record_unknown_user(&self) { self.verifications_unknown_user.fetch_add(1, Ordering::Relaxed); }
    pub fn record_extraction_failure(&self) { self.extraction_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn record_scoring_failure(&self) { self.scoring_failures.fetch_add(1, Ordering::Relaxed); }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registrations_created: self.registrations_created.load(Ordering::Relaxed),
            registrations_updated: self.registrations_updated.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            verifications_granted: self.verifications_granted.load(Ordering::Relaxed),
            verifications_denied: self.verifications_denied.load(Ordering::Relaxed),
            verifications_unknown_user: self.verifications_unknown_user.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            scoring_failures: self.scoring_failures.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
