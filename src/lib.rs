//! Aggregates per-client node/config/connection tables polled from a fleet of
//! radio clients and publishes a merged fleet view to a presentation manager
//! (PM) over WebSocket. See `SPEC_FULL.md` for the component breakdown.

pub mod aggregator;
pub mod client_state;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod model;
pub mod net;
pub mod reply_parser;
pub mod ws;

pub use error::{ConfigError, ConnectError, ControlError, ProtocolError};
