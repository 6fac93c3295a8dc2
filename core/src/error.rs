//! Error types for the ident responder

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the ident responder
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to bind ident server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Ident lookup error: {0}")]
    Lookup(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("Connection registry error: {0}")]
    Registry(String),
}

impl Error {
    /// Whether this is a bind failure caused by missing privileges
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Error::Bind { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_permission_denied_detection() {
        let addr: SocketAddr = "0.0.0.0:113".parse().unwrap();
        let denied = Error::Bind {
            addr,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied"),
        };
        assert!(denied.is_permission_denied());

        let in_use = Error::Bind {
            addr,
            source: io::Error::new(io::ErrorKind::AddrInUse, "Address in use"),
        };
        assert!(!in_use.is_permission_denied());

        let io_error = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(!io_error.is_permission_denied());
    }
}
