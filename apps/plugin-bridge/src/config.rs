use std::env;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port of the client-facing WebSocket listener.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PLUGIN_BRIDGE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(2503),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { port: 2503 }
    }
}
