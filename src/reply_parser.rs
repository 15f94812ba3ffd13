//! C7 — Reply Parser.
//!
//! Turns a client's tab/space-separated text replies into typed records
//! using the column schema most recently advertised by that client's `214`
//! help reply. Pure functions only — no I/O, no locking — so the bulk of
//! the parsing contract (property #1, #2, #3 in `SPEC_FULL.md` §8) is
//! testable without a socket.

use crate::model::{Address, ClientNode, ColumnSchema, Configuration, Connection, ListKind};
use tracing::debug;

pub const READY: u32 = 200;
pub const COMMAND_OUTPUT: u32 = 201;
pub const BANNER: u32 = 211;
pub const HELP: u32 = 214;
pub const DISCONNECTING: u32 = 221;
pub const PARSE_ERROR_A: u32 = 400;
pub const PARSE_ERROR_B: u32 = 401;
pub const BUSY: u32 = 500;

/// A parsed `<code> <tokens...>` reply line.
pub struct ReplyLine {
    pub code: u32,
    pub tokens: Vec<String>,
}

/// Splits a raw line into its numeric code and whitespace-separated
/// tokens, normalizing tabs to spaces first (§6).
pub fn parse_reply_line(line: &str) -> Option<ReplyLine> {
    let normalized = line.replace('\t', " ");
    let mut parts = normalized.split_whitespace();
    let code: u32 = parts.next()?.parse().ok()?;
    let tokens = parts.map(str::to_string).collect();
    Some(ReplyLine { code, tokens })
}

/// What the caller (`WClient::handle_line`) should do after applying a
/// reply to its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyEffect {
    None,
    /// A list finished; the aggregator should be notified of new data.
    ListFinished,
    /// `500 BUSY`: discard the pending request and force a reconnect on
    /// the next poll cycle.
    ForceDisconnect,
}

/// Applies one `214` schema reply: replaces the schema wholesale.
pub fn apply_schema(tokens: &[String]) -> ColumnSchema {
    ColumnSchema::from_tokens(tokens.iter().cloned())
}

/// Applies one `201` row reply against `kind`'s field-name table. Unknown
/// column names are ignored; their token contributes nothing.
pub fn parse_node_row(schema: &ColumnSchema, tokens: &[String]) -> ClientNode {
    let mut node = ClientNode::default();
    for (k, token) in tokens.iter().enumerate() {
        match schema.name_at(k) {
            Some("ID") => node.id = token.parse().unwrap_or(0),
            Some("AGE") => node.age = token.parse().unwrap_or(0),
            Some("CR") => node.cr = token.parse().unwrap_or(0),
            Some("LAT") => node.lat = token.parse().unwrap_or(0.0),
            Some("LON") => node.lon = token.parse().unwrap_or(0.0),
            Some("P2P_IP") => node.p2p_ip = Address::parse(token).unwrap_or_default(),
            Some("RADAC_IP") => node.radac_ip = Address::parse(token).unwrap_or_default(),
            Some(other) => debug!(column = %other, "unknown column for cn row"),
            None => {}
        }
    }
    node
}

pub fn parse_config_row(schema: &ColumnSchema, tokens: &[String]) -> Configuration {
    let mut config = Configuration::default();
    for (k, token) in tokens.iter().enumerate() {
        match schema.name_at(k) {
            Some("ID") => config.id = token.parse().unwrap_or(0),
            Some("AGE") => config.age = token.parse().unwrap_or(0),
            Some("SRC_IP") => config.src_ip = Address::parse(token).unwrap_or_default(),
            Some("CONFIG") => config.config = token.clone(),
            Some(other) => debug!(column = %other, "unknown column for configs row"),
            None => {}
        }
    }
    config
}

pub fn parse_connection_row(schema: &ColumnSchema, tokens: &[String]) -> Connection {
    let mut connection = Connection::default();
    for (k, token) in tokens.iter().enumerate() {
        match schema.name_at(k) {
            Some("DIR") => connection.dir = token.clone(),
            Some("PEER_ID") => connection.peer_id = token.parse().unwrap_or(0),
            Some("PEER_IP") => connection.peer_ip = Address::parse(token).unwrap_or_default(),
            Some(other) => debug!(column = %other, "unknown column for connections row"),
            None => {}
        }
    }
    connection
}

/// Maps a queued request string to which dataset it populates, mirroring
/// `ListKind::from_command` but tolerant of extra whitespace already
/// handled upstream.
pub fn list_kind_of(command: &str) -> Option<ListKind> {
    ListKind::from_command(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_tokens_with_tab_normalization() {
        let reply = parse_reply_line("201\t7\t59.9\t10.7").unwrap();
        assert_eq!(reply.code, 201);
        assert_eq!(reply.tokens, vec!["7", "59.9", "10.7"]);
    }

    #[test]
    fn row_fields_match_positional_schema() {
        let schema = apply_schema(&["ID".into(), "LAT".into(), "LON".into()]);
        let tokens = vec!["7".to_string(), "59.9".to_string(), "10.7".to_string()];
        let node = parse_node_row(&schema, &tokens);
        assert_eq!(node.id, 7);
        assert_eq!(node.lat, 59.9);
        assert_eq!(node.lon, 10.7);
    }

    #[test]
    fn unknown_column_leaves_field_at_zero() {
        let schema = apply_schema(&["ID".into(), "BOGUS".into(), "LAT".into()]);
        let tokens = vec!["3".to_string(), "ignored".to_string(), "12.5".to_string()];
        let node = parse_node_row(&schema, &tokens);
        assert_eq!(node.id, 3);
        assert_eq!(node.lat, 12.5);
        assert_eq!(node.cr, 0);
    }
}
