//! Ident lookups against a remote responder (RFC 1413 client side)

use crate::client::MAX_QUERY_LENGTH;
use crate::protocol::{parse_query, unescape_string};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Parsed reply from an ident responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentResponse {
    /// The responder named the owner of the connection
    UserId { os: String, user: String },
    /// The responder returned an error token such as `NO-USER`
    Error(String),
}

/// Ident client for RFC 1413 ident lookups
#[derive(Debug, Clone)]
pub struct IdentLookup {
    timeout: Duration,
}

impl Default for IdentLookup {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl IdentLookup {
    /// Create a new ident client
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Ask the responder at `addr` who owns the connection `local_port , remote_port`,
    /// where `local_port` is the port on the responder's host.
    pub async fn query(
        &self,
        addr: SocketAddr,
        local_port: u16,
        remote_port: u16,
    ) -> Result<IdentResponse> {
        let mut stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Lookup("Ident connection timeout".to_string()))?
            .map_err(|e| Error::Lookup(format!("Failed to connect to ident service: {}", e)))?;

        let query = format!("{}, {}\r\n", local_port, remote_port);
        stream
            .write_all(query.as_bytes())
            .await
            .map_err(|e| Error::Lookup(format!("Failed to send ident query: {}", e)))?;

        let mut reader = BufReader::new(stream.take(MAX_QUERY_LENGTH));
        let mut line = String::new();
        let read = timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Lookup("Ident response timeout".to_string()))?
            .map_err(|e| Error::Lookup(format!("Failed to read ident response: {}", e)))?;

        if read == 0 {
            return Err(Error::Lookup("Ident service closed without replying".to_string()));
        }

        let (local, remote, response) = parse_response(&line)?;
        if (local, remote) != (local_port, remote_port) {
            return Err(Error::Lookup(format!(
                "Ident reply for {} , {} does not match query",
                local, remote
            )));
        }

        Ok(response)
    }
}

/// Parse a reply line into its port pair and response
pub fn parse_response(line: &str) -> Result<(u16, u16, IdentResponse)> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let fields = split_fields(line, 4);
    let invalid = || Error::Lookup(format!("Invalid ident response format: {:?}", line));

    let ports = fields.first().ok_or_else(invalid)?;
    let query = parse_query(ports).map_err(|_| invalid())?;

    let response = match fields.get(1).map(|kind| kind.trim()) {
        Some("USERID") if fields.len() == 4 => IdentResponse::UserId {
            os: unescape_string(fields[2].trim()),
            user: unescape_string(fields[3].trim()),
        },
        Some("ERROR") if fields.len() >= 3 => {
            IdentResponse::Error(unescape_string(fields[2..].join(":").trim()))
        }
        _ => return Err(invalid()),
    };

    Ok((query.local_port, query.remote_port, response))
}

/// Split on colons that are not escaped, into at most `limit` fields
fn split_fields(line: &str, limit: usize) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (index, c) in line.char_indices() {
        if fields.len() + 1 == limit {
            break;
        }
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ':' => {
                fields.push(&line[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }

    fields.push(&line[start..]);
    fields
}
