pub mod http;
pub mod ws;

use std::sync::Arc;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::sync::SyncHub;

/// Shared state for all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SyncHub>,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
}
