//! Rust Ident Responder Core
//!
//! This crate answers RFC 1413 ident queries on behalf of an IRC client. The
//! server only needs to run while connection attempts are in progress;
//! [`IdentdManager`] starts and stops it in response to connection events.

pub mod client;
pub mod config;
pub mod error;
pub mod lookup;
pub mod manager;
pub mod module;
pub mod protocol;
pub mod registry;
pub mod rehash;
pub mod response;
pub mod server;
pub mod system;

pub use client::{ClientList, IdentClient};
pub use config::{Config, RegistryKind, SharedConfig};
pub use error::{Error, Result};
pub use lookup::{IdentLookup, IdentResponse};
pub use manager::{ConnectionEvent, IdentdManager};
pub use module::{IdentdModule, Module, ModuleManager};
pub use protocol::{escape_string, parse_query, unescape_string, IdentQuery, IdentReply};
pub use registry::{
    ActiveConnection, ActiveConnections, ConnectionRegistry, NoConnections, SocketTableRegistry,
};
pub use rehash::RehashService;
pub use response::IdentResponder;
pub use server::IdentdServer;
pub use system::{FixedSystemInfo, OsSystemInfo, SystemInfo};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use tracing::{debug, error, info, warn};
