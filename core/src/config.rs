//! Configuration management

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default ident port (RFC 1413)
pub const DEFAULT_IDENT_PORT: u16 = 113;

/// Longest custom name or custom system that will be sent in a reply
pub const MAX_CUSTOM_LENGTH: usize = 512;

/// Configuration shared between the server, its clients and the rehash service
pub type SharedConfig = Arc<RwLock<Config>>;

/// Ident responder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which name is reported in USERID replies
    pub general: GeneralConfig,
    /// How the responder behaves
    pub advanced: AdvancedConfig,
    /// Listener settings
    pub server: ServerConfig,
}

/// Name selection settings. Later options take priority over earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Report the connection's username rather than the system account name
    #[serde(alias = "useUsername")]
    pub use_username: bool,
    /// Report the connection's nickname rather than the system account name
    #[serde(alias = "useNickname")]
    pub use_nickname: bool,
    /// Always report `custom_name`
    #[serde(alias = "useCustomName")]
    pub use_custom_name: bool,
    /// Name reported when `use_custom_name` is set
    #[serde(alias = "customName")]
    pub custom_name: String,
}

/// Advanced responder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    /// Keep the ident port open even when no connection attempt is in progress
    #[serde(alias = "alwaysOn")]
    pub always_on: bool,
    /// Port to listen on
    pub port: u16,
    /// Report `custom_system` instead of the detected operating system
    #[serde(alias = "useCustomSystem")]
    pub use_custom_system: bool,
    /// System name reported when `use_custom_system` is set
    #[serde(alias = "customSystem")]
    pub custom_system: String,
    /// Answer every valid query with HIDDEN-USER
    #[serde(alias = "isHiddenUser")]
    pub is_hidden_user: bool,
    /// Answer every valid query with NO-USER (overrides HIDDEN-USER)
    #[serde(alias = "isNoUser")]
    pub is_no_user: bool,
}

/// Connection registry used by the standalone daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// Resolve local ports through the operating system's TCP socket table
    SocketTable,
    /// Never match a connection
    None,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the ident port on
    pub bind_address: String,
    /// Maximum number of queries served concurrently
    pub max_connections: usize,
    /// Seconds to wait for a query line before closing the connection
    pub read_timeout_seconds: u64,
    /// Connection registry for the standalone daemon
    pub registry: RegistryKind,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            always_on: false,
            port: DEFAULT_IDENT_PORT,
            use_custom_system: false,
            custom_system: String::new(),
            is_hidden_user: false,
            is_no_user: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            max_connections: 64,
            read_timeout_seconds: 30,
            registry: RegistryKind::SocketTable,
        }
    }
}

impl ServerConfig {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Wrap this configuration for sharing
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.advanced.port == 0 {
            return Err(Error::Config("Ident port cannot be 0".to_string()));
        }

        if self.advanced.custom_system.chars().count() > MAX_CUSTOM_LENGTH {
            return Err(Error::Config(format!(
                "Custom system cannot be longer than {} characters",
                MAX_CUSTOM_LENGTH
            )));
        }

        if self.general.custom_name.chars().count() > MAX_CUSTOM_LENGTH {
            return Err(Error::Config(format!(
                "Custom name cannot be longer than {} characters",
                MAX_CUSTOM_LENGTH
            )));
        }

        if self.server.max_connections == 0 {
            return Err(Error::Config("Max connections must be greater than 0".to_string()));
        }

        if self.server.max_connections > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "Max connections cannot be more than {}",
                Semaphore::MAX_PERMITS
            )));
        }

        if self.server.read_timeout_seconds == 0 {
            return Err(Error::Config("Read timeout must be greater than 0".to_string()));
        }

        self.bind_ip()?;

        Ok(())
    }

    /// Address the listener binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.advanced.port))
    }

    fn bind_ip(&self) -> Result<IpAddr> {
        self.server.bind_address.parse::<IpAddr>().map_err(|_| {
            Error::Config(format!("Invalid bind address: {}", self.server.bind_address))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.advanced.port, 113);
        assert!(!config.advanced.always_on);
        assert!(!config.general.use_custom_name);
        assert_eq!(config.server.registry, RegistryKind::SocketTable);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.listen_addr().unwrap(),
            "0.0.0.0:113".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[advanced]\nalways_on = true\n").unwrap();
        assert!(config.advanced.always_on);
        assert_eq!(config.advanced.port, 113);
        assert_eq!(config.server.max_connections, 64);
    }

    #[test]
    fn test_settings_domain_aliases() {
        let content = r#"
            [general]
            useNickname = true
            customName = "alice"

            [advanced]
            alwaysOn = true
            isHiddenUser = true
            customSystem = "OTHER"
        "#;
        let config: Config = toml::from_str(content).unwrap();
        assert!(config.general.use_nickname);
        assert_eq!(config.general.custom_name, "alice");
        assert!(config.advanced.always_on);
        assert!(config.advanced.is_hidden_user);
        assert_eq!(config.advanced.custom_system, "OTHER");
    }

    #[test]
    fn test_port_out_of_range_is_rejected() {
        assert!(toml::from_str::<Config>("[advanced]\nport = 70000\n").is_err());

        let config: Config = toml::from_str("[advanced]\nport = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.general.custom_name = "x".repeat(MAX_CUSTOM_LENGTH + 1);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.advanced.custom_system = "x".repeat(MAX_CUSTOM_LENGTH);
        assert!(config.validate().is_ok());
        config.advanced.custom_system.push('x');
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.max_connections = Semaphore::MAX_PERMITS;
        assert!(config.validate().is_ok());
        config.server.max_connections += 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.read_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.bind_address = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_connection_limit_is_rejected() {
        let content = r#"
            [server]
            bind_address = "127.0.0.1"
            max_connections = 9223372036854775807
        "#;
        let config: Config = toml::from_str(content).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identd.toml");

        let mut config = Config::default();
        config.advanced.port = 1113;
        config.general.use_username = true;
        config.server.registry = RegistryKind::None;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
