//! Inbound HTTP surface: start a turn, stream an answer, health probe.

pub mod routes;
pub mod server;

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::watcher::relay::StreamRelay;

/// State shared by every request handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Watch loop driver.
    pub relay: Arc<StreamRelay>,
}
