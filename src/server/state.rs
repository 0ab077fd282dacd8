//! Application state for the DermaVision server

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::inference::Predictor;
use crate::model::ResolverState;

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Prediction pipeline, owning the model resolver
    pub predictor: Predictor,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, predictor: Predictor) -> Self {
        Self {
            config,
            predictor,
            started_at: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Resolver state, read without triggering a load
    pub fn model_state(&self) -> ResolverState {
        self.predictor.resolver().state()
    }

    pub fn model_loaded(&self) -> bool {
        matches!(
            self.model_state(),
            ResolverState::LoadedCompact | ResolverState::LoadedGraph
        )
    }
}

pub type SharedState = Arc<AppState>;
