pub mod config;
pub mod error;
pub mod relay;
pub mod routes;

use std::sync::Arc;

use config::Config;
use relay::presence::PresenceRelay;
use relay::registry::RoomRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<PresenceRelay>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            relay: Arc::new(PresenceRelay::new(Arc::new(RoomRegistry::new()))),
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        self.relay.registry()
    }
}
