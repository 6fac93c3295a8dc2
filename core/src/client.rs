//! Per-connection ident query handling

use crate::protocol::IdentReply;
use crate::response::IdentResponder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest query line read from a peer, terminator included
pub const MAX_QUERY_LENGTH: u64 = 1024;

/// Clients owned by a server, keyed by client id
#[derive(Debug, Default)]
pub struct ClientList {
    clients: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ClientList {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, id: Uuid, token: CancellationToken) {
        self.clients.lock().insert(id, token);
    }

    fn remove(&self, id: &Uuid) {
        self.clients.lock().remove(id);
    }

    /// Close every client and forget about them
    pub fn close_all(&self) {
        let mut clients = self.clients.lock();
        for token in clients.values() {
            token.cancel();
        }
        clients.clear();
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

/// Removes a client from its list whichever way the client exits
struct Registration {
    id: Uuid,
    clients: Arc<ClientList>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.clients.remove(&self.id);
    }
}

/// A single accepted ident connection
pub struct IdentClient {
    id: Uuid,
    stream: TcpStream,
    peer: SocketAddr,
    responder: IdentResponder,
    read_timeout: Duration,
    token: CancellationToken,
    registration: Registration,
    _permit: OwnedSemaphorePermit,
}

impl IdentClient {
    /// Create a client and add it to `clients`
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        responder: IdentResponder,
        read_timeout: Duration,
        clients: Arc<ClientList>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        clients.add(id, token.clone());

        Self {
            id,
            stream,
            peer,
            responder,
            read_timeout,
            token,
            registration: Registration { id, clients },
            _permit: permit,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve this client on its own task
    pub fn start(self) -> JoinHandle<Option<IdentReply>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Option<IdentReply> {
        let IdentClient {
            id,
            mut stream,
            peer,
            responder,
            read_timeout,
            token,
            registration,
            _permit: permit,
        } = self;

        let reply = tokio::select! {
            _ = token.cancelled() => {
                debug!("Ident client {} from {} closed", id, peer);
                None
            }
            result = Self::serve(&mut stream, peer, &responder, read_timeout) => match result {
                Ok(reply) => reply,
                Err(e) => {
                    if !token.is_cancelled() {
                        warn!("Ident client {} from {} failed: {}", id, peer, e);
                    }
                    None
                }
            },
        };

        // An empty client list means every connection slot is free
        drop(stream);
        drop(permit);
        drop(registration);
        reply
    }

    async fn serve(
        stream: &mut TcpStream,
        peer: SocketAddr,
        responder: &IdentResponder,
        read_timeout: Duration,
    ) -> io::Result<Option<IdentReply>> {
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half.take(MAX_QUERY_LENGTH));
        let mut buffer = Vec::new();

        let read = match timeout(read_timeout, read_query_line(&mut reader, &mut buffer)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("Ident client {} sent no query within {:?}", peer, read_timeout);
                return Ok(None);
            }
        };

        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&buffer)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();

        // Registry lookups may read the socket table from the OS
        let lookup = responder.clone();
        let query = line.clone();
        let reply = tokio::task::spawn_blocking(move || lookup.respond(&query)).await?;
        debug!("Ident query from {}: {:?} -> {}", peer, line, reply);

        write_half.write_all(format!("{}\r\n", reply).as_bytes()).await?;
        write_half.flush().await?;
        write_half.shutdown().await?;

        Ok(Some(reply))
    }
}

/// Read up to and including a `\n`, `\r\n` or bare `\r` terminator.
///
/// Returns the number of bytes appended to `line`, 0 at EOF.
async fn read_query_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut read = 0;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read);
        }

        match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(end) => {
                let mut used = end + 1;
                if available[end] == b'\r' && available.get(used) == Some(&b'\n') {
                    used += 1;
                }
                line.extend_from_slice(&available[..used]);
                reader.consume(used);
                return Ok(read + used);
            }
            None => {
                let used = available.len();
                line.extend_from_slice(available);
                reader.consume(used);
                read += used;
            }
        }
    }
}
