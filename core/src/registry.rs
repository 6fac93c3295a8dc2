//! Registry of outbound IRC connections the responder can answer for

use crate::system::process_owner;
use crate::{Error, Result};
use netstat2::{
    get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState,
};
use parking_lot::RwLock;
use tracing::{trace, warn};
use uuid::Uuid;

/// An outbound connection as seen by the ident responder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveConnection {
    /// Local port the connection is bound to
    pub local_port: u16,
    /// Nickname in use on the connection, if known
    pub nickname: Option<String>,
    /// Username sent during registration, if known
    pub username: Option<String>,
}

impl ActiveConnection {
    pub fn new(local_port: u16, nickname: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            local_port,
            nickname: Some(nickname.into()),
            username: Some(username.into()),
        }
    }
}

/// Read-only view of the active outbound connections
pub trait ConnectionRegistry: Send + Sync {
    /// All connections currently attempting or established
    fn connections(&self) -> Vec<ActiveConnection>;

    /// The connection bound to `port` on this host
    fn find_by_local_port(&self, port: u16) -> Option<ActiveConnection> {
        self.connections()
            .into_iter()
            .find(|connection| connection.local_port == port)
    }
}

/// Registry maintained by the embedding IRC client
#[derive(Debug, Default)]
pub struct ActiveConnections {
    entries: RwLock<Vec<(Uuid, ActiveConnection)>>,
}

impl ActiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection, replacing any entry with the same id
    pub fn add(&self, id: Uuid, connection: ActiveConnection) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some(entry) => entry.1 = connection,
            None => entries.push((id, connection)),
        }
    }

    /// Remove a connection
    pub fn remove(&self, id: &Uuid) -> Option<ActiveConnection> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|(entry_id, _)| entry_id == id)?;
        Some(entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ConnectionRegistry for ActiveConnections {
    fn connections(&self) -> Vec<ActiveConnection> {
        self.entries
            .read()
            .iter()
            .map(|(_, connection)| connection.clone())
            .collect()
    }
}

/// Registry that never matches a connection
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConnections;

impl ConnectionRegistry for NoConnections {
    fn connections(&self) -> Vec<ActiveConnection> {
        Vec::new()
    }
}

/// Registry backed by the operating system's TCP socket table.
///
/// Every established TCP socket on this host counts as a connection. Only
/// [`ConnectionRegistry::find_by_local_port`] resolves the owning account,
/// which is reported as the connection's username.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketTableRegistry;

impl SocketTableRegistry {
    /// Local port and owning pid of every established TCP socket
    fn established(&self) -> Result<Vec<(u16, Option<u32>)>> {
        let sockets = get_sockets_info(
            AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
            ProtocolFlags::TCP,
        )
        .map_err(|e| Error::Registry(format!("Failed to query TCP socket table: {}", e)))?;

        Ok(sockets
            .into_iter()
            .filter_map(|socket| match socket.protocol_socket_info {
                ProtocolSocketInfo::Tcp(tcp) if matches!(tcp.state, TcpState::Established) => {
                    Some((tcp.local_port, socket.associated_pids.first().copied()))
                }
                _ => None,
            })
            .collect())
    }

    fn established_or_empty(&self) -> Vec<(u16, Option<u32>)> {
        self.established().unwrap_or_else(|e| {
            warn!("{}", e);
            Vec::new()
        })
    }
}

impl ConnectionRegistry for SocketTableRegistry {
    fn connections(&self) -> Vec<ActiveConnection> {
        self.established_or_empty()
            .into_iter()
            .map(|(local_port, _)| ActiveConnection {
                local_port,
                nickname: None,
                username: None,
            })
            .collect()
    }

    fn find_by_local_port(&self, port: u16) -> Option<ActiveConnection> {
        let (local_port, pid) = self
            .established_or_empty()
            .into_iter()
            .find(|(local_port, _)| *local_port == port)?;

        let username = pid.and_then(process_owner);
        trace!("Local port {} owned by pid {:?} ({:?})", port, pid, username);

        Some(ActiveConnection {
            local_port,
            nickname: None,
            username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{OsSystemInfo, SystemInfo};

    #[test]
    fn test_active_connections() {
        let registry = ActiveConnections::new();
        assert!(registry.is_empty());

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        registry.add(first, ActiveConnection::new(6000, "alice", "alice_user"));
        registry.add(second, ActiveConnection::new(6001, "bob", "bob_user"));
        assert_eq!(registry.len(), 2);

        let found = registry.find_by_local_port(6001).unwrap();
        assert_eq!(found.nickname.as_deref(), Some("bob"));
        assert!(registry.find_by_local_port(6002).is_none());

        registry.add(first, ActiveConnection::new(6005, "alice", "alice_user"));
        assert_eq!(registry.len(), 2);
        assert!(registry.find_by_local_port(6000).is_none());
        assert!(registry.find_by_local_port(6005).is_some());

        assert!(registry.remove(&first).is_some());
        assert!(registry.remove(&first).is_none());
        assert_eq!(registry.connections(), vec![ActiveConnection::new(6001, "bob", "bob_user")]);
    }

    #[test]
    fn test_socket_table_finds_own_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        let port = client.local_addr().unwrap().port();

        let found = SocketTableRegistry.find_by_local_port(port).unwrap();
        assert_eq!(found.local_port, port);
        assert_eq!(found.nickname, None);
        assert_eq!(found.username, Some(OsSystemInfo.user_name()));

        assert!(SocketTableRegistry
            .connections()
            .iter()
            .any(|connection| connection.local_port == port));

        let unused = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(SocketTableRegistry.find_by_local_port(unused).is_none());
    }

    #[test]
    fn test_no_connections() {
        assert!(NoConnections.connections().is_empty());
        assert!(NoConnections.find_by_local_port(6667).is_none());
    }
}
