pub mod api;
pub mod db;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod stats;
pub mod utils;

use std::sync::Arc;

use pipeline::engine::VerificationEngine;

#[derive(Clone)]
pub struct AppState {
    pub started_at: std::time::Instant,
    pub engine: Arc<VerificationEngine>,
}

impl AppState {
    pub fn new(engine: VerificationEngine) -> Self {
        Self {
            started_at: std::time::Instant::now(),
            engine: Arc::new(engine),
        }
    }

    pub fn stats(&self) -> &Arc<stats::Stats> {
        self.engine.stats()
    }
}
