/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Party name accepted in `/parties/{party}/{room}`.
    pub party: String,
    /// Undelivered events a peer may queue before it is evicted.
    pub peer_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1999,
            party: "globe".to_string(),
            peer_queue_capacity: 256,
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Every variable is
    /// optional; unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            party: std::env::var("PARTY_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.party),
            peer_queue_capacity: parsed_var("PEER_QUEUE_CAPACITY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.peer_queue_capacity),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
