//! C3 (data model) — the wire-level entities shared by the reply parser, the
//! client state, and the aggregator. See `SPEC_FULL.md` §3.

use serde::Serialize;
use std::fmt;

/// `{host, port}`, parsed from either `"host port"` or `"host:port"`. The
/// port is kept textual since it is only ever emitted verbatim, never
/// arithmetic'd on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: String,
}

impl Address {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Parses `"host port"` or `"host:port"`. Whitespace form takes
    /// precedence since that's the clients-file format (§6); the colon form
    /// covers PM URLs and tokens embedded in client replies.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some((host, port)) = s.split_once(char::is_whitespace) {
            let host = host.trim();
            let port = port.trim();
            if !host.is_empty() && !port.is_empty() {
                return Some(Self::new(host, port));
            }
        }
        if let Some((host, port)) = s.rsplit_once(':') {
            if !host.is_empty() && !port.is_empty() {
                return Some(Self::new(host, port));
            }
        }
        None
    }

    /// A `host:port` pair suitable for `tokio::net::lookup_host`.
    pub fn socket_addr_str(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A peer discovered by a client in its local radio neighbourhood — the
/// unit of fleet aggregation. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientNode {
    pub id: u32,
    pub age: u32,
    pub cr: u32,
    pub lat: f64,
    pub lon: f64,
    pub p2p_ip: Address,
    pub radac_ip: Address,
}

impl Default for ClientNode {
    fn default() -> Self {
        Self {
            id: 0,
            age: 0,
            cr: 0,
            lat: 0.0,
            lon: 0.0,
            p2p_ip: Address::default(),
            radac_ip: Address::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configuration {
    pub id: u32,
    pub age: u32,
    pub src_ip: Address,
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Connection {
    pub dir: String,
    pub peer_id: u32,
    pub peer_ip: Address,
}

/// The ordered column names advertised by a `214` help reply. Later row
/// replies are interpreted positionally against the most recently received
/// schema, until the next `214` replaces it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSchema {
    columns: Vec<String>,
}

impl ColumnSchema {
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// The upper-cased column name at position `k`, if any.
    pub fn name_at(&self, k: usize) -> Option<&str> {
        self.columns.get(k).map(String::as_str)
    }
}

/// Which list kind a row reply (or a pending request) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    ClientNodes,
    Configs,
    Connections,
}

impl ListKind {
    /// Maps a queued command string (e.g. `"list cn"`) to its list kind.
    pub fn from_command(command: &str) -> Option<Self> {
        match command.trim() {
            "list cn" => Some(ListKind::ClientNodes),
            "list configs" => Some(ListKind::Configs),
            "list connections" => Some(ListKind::Connections),
            _ => None,
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            ListKind::ClientNodes => "list cn",
            ListKind::Configs => "list configs",
            ListKind::Connections => "list connections",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whitespace_form() {
        let addr = Address::parse("10.0.0.1 4002").unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, "4002");
    }

    #[test]
    fn parses_colon_form() {
        let addr = Address::parse("10.0.0.1:4002").unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, "4002");
    }

    #[test]
    fn rejects_empty() {
        assert!(Address::parse("").is_none());
        assert!(Address::parse("justhost").is_none());
    }

    #[test]
    fn list_kind_roundtrips_through_command() {
        for kind in [
            ListKind::ClientNodes,
            ListKind::Configs,
            ListKind::Connections,
        ] {
            assert_eq!(ListKind::from_command(kind.command()), Some(kind));
        }
    }
}
