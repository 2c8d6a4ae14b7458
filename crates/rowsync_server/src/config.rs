//! Server configuration.

use rowsync_engine::EngineConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Journal file backing the store; `None` keeps everything in memory.
    pub data_path: Option<PathBuf>,
    /// Largest number of rows accepted by one bulk write.
    pub max_push_batch: usize,
    /// Engine configuration.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            data_path: None,
            max_push_batch: 500,
            engine: EngineConfig::default(),
        }
    }

    /// Persists state to the journal at `path`.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Sets the maximum bulk write size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.data_path.is_none());
        assert_eq!(config.engine.default_fetch_limit, 100);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_data_path("/var/lib/rowsync/journal")
            .with_max_push_batch(50)
            .with_engine(EngineConfig::new().with_max_fetch_limit(20));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(
            config.data_path.as_deref(),
            Some(std::path::Path::new("/var/lib/rowsync/journal"))
        );
        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.engine.max_fetch_limit, 20);
    }
}
