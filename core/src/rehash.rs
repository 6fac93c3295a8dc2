//! Rehash system for runtime configuration reloading

use crate::config::{Config, SharedConfig};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Rehash service for runtime configuration reloading
pub struct RehashService {
    /// Current configuration
    config: SharedConfig,
    /// Configuration file path
    config_path: PathBuf,
}

impl RehashService {
    /// Create a new rehash service
    pub fn new(config: SharedConfig, config_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the configuration file.
    ///
    /// The current configuration stays in place if the file cannot be read
    /// or does not validate. A port change applies the next time the server
    /// starts.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = match Config::from_file(&self.config_path).and_then(|config| {
            config.validate()?;
            Ok(config)
        }) {
            Ok(config) => config,
            Err(e) => {
                warn!("Keeping current configuration: {}", e);
                return Err(e);
            }
        };

        let port_changed = {
            let mut config = self.config.write();
            let port_changed = config.advanced.port != new_config.advanced.port;
            *config = new_config;
            port_changed
        };

        if port_changed {
            info!("Ident port changed; it takes effect when the server next starts");
        }

        info!("Configuration reloaded successfully");
        Ok(())
    }
}
