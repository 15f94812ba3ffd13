//! Typed error kinds per failure domain (see `SPEC_FULL.md` §7). None of
//! these map to a halting panic; only `ConfigError` at startup reaches
//! `main` and sets a non-zero exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing presentation manager URL")]
    MissingPmUrl,
    #[error("invalid presentation manager URL: {0}")]
    InvalidPmUrl(String),
    #[error("clients file not found: {0}")]
    ClientsFileNotFound(String),
    #[error("invalid client line: {0:?}")]
    InvalidClientLine(String),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("missing destination host")]
    MissingDestination,
    #[error("missing destination port")]
    MissingDestinationPort,
    #[error("could not connect to {0}")]
    CouldNotConnect(String),
    #[error("not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WsError {
    #[error("websocket handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("invalid websocket message")]
    InvalidMessage,
    #[error("websocket socket error: {0}")]
    SocketError(#[from] std::io::Error),
}

/// Protocol-level parse failures. These are logged at debug and the
/// offending tokens are dropped; client state is otherwise preserved.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to parse reply line: {0:?}")]
    ParseFailure(String),
    #[error("unknown column name: {0}")]
    UnknownColumn(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Unknown command. HELP shows available commands.")]
    UnknownCommand,
    #[error("missing parameters")]
    MissingParameters,
    #[error("client not found: {0}:{1}")]
    ClientNotFound(String, String),
}
