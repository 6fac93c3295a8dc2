//! RFC 1413 query parsing and reply formatting
//!
//! A query is a single line `<local-port> , <remote-port>` where the local
//! port is the port on this host. Every reply repeats the port pair and
//! carries either a USERID or an ERROR token.

use std::fmt;

/// Lowest valid TCP port in a query
pub const MIN_PORT: i32 = 1;
/// Highest valid TCP port in a query
pub const MAX_PORT: i32 = 65535;

/// Escape the characters that have meaning inside a reply field
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

/// Undo [`escape_string`] on text received from a peer
pub fn unescape_string(s: &str) -> String {
    s.replace("\\:", ":")
        .replace("\\ ", " ")
        .replace("\\,", ",")
        .replace("\\\\", "\\")
}

/// A validated ident query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentQuery {
    /// Port of the connection on this host
    pub local_port: u16,
    /// Port of the connection on the querying host
    pub remote_port: u16,
}

impl IdentQuery {
    /// Build a query, rejecting ports outside 1..=65535
    pub fn new(local_port: i32, remote_port: i32) -> Option<Self> {
        Some(Self {
            local_port: valid_port(local_port)?,
            remote_port: valid_port(remote_port)?,
        })
    }
}

fn valid_port(port: i32) -> Option<u16> {
    if (MIN_PORT..=MAX_PORT).contains(&port) {
        u16::try_from(port).ok()
    } else {
        None
    }
}

/// A single reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentReply {
    /// The connection is owned by `user` on `os`
    UserId {
        query: IdentQuery,
        os: String,
        user: String,
    },
    /// No user is associated with the port pair
    NoUser(IdentQuery),
    /// The user exists but will not be revealed
    HiddenUser(IdentQuery),
    /// One of the ports is out of range
    InvalidPort { local_port: i32, remote_port: i32 },
    /// The query did not contain a port pair
    InvalidInput(String),
    /// The query contained a pair that was not numeric
    InvalidPorts(String, String),
}

impl IdentReply {
    /// Whether this reply carries an ERROR token
    pub fn is_error(&self) -> bool {
        !matches!(self, IdentReply::UserId { .. })
    }
}

impl fmt::Display for IdentReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentReply::UserId { query, os, user } => write!(
                f,
                "{} , {} : USERID : {} : {}",
                query.local_port,
                query.remote_port,
                escape_string(os),
                escape_string(user)
            ),
            IdentReply::NoUser(query) => write!(
                f,
                "{} , {} : ERROR : NO-USER",
                query.local_port, query.remote_port
            ),
            IdentReply::HiddenUser(query) => write!(
                f,
                "{} , {} : ERROR : HIDDEN-USER",
                query.local_port, query.remote_port
            ),
            IdentReply::InvalidPort { local_port, remote_port } => {
                write!(f, "{} , {} : ERROR : INVALID-PORT", local_port, remote_port)
            }
            IdentReply::InvalidInput(input) => {
                write!(f, "{} : ERROR : X-INVALID-INPUT", escape_string(input))
            }
            IdentReply::InvalidPorts(first, second) => write!(
                f,
                "{} , {} : ERROR : X-INVALID-INPUT",
                escape_string(first),
                escape_string(second)
            ),
        }
    }
}

/// Parse a raw query line, or produce the error reply it deserves
pub fn parse_query(line: &str) -> Result<IdentQuery, IdentReply> {
    let unescaped = unescape_string(line);
    let compact: String = unescaped.chars().filter(|c| !c.is_whitespace()).collect();

    let (first, second) = match compact.split_once(',') {
        Some(parts) => parts,
        None => return Err(IdentReply::InvalidInput(unescaped)),
    };

    let (local_port, remote_port) = match (first.parse::<i32>(), second.parse::<i32>()) {
        (Ok(local), Ok(remote)) => (local, remote),
        _ => {
            return Err(IdentReply::InvalidPorts(
                first.to_string(),
                second.to_string(),
            ))
        }
    };

    IdentQuery::new(local_port, remote_port).ok_or(IdentReply::InvalidPort {
        local_port,
        remote_port,
    })
}
