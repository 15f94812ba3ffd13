pub mod line_reader;
pub mod tcp_connection;

pub use line_reader::{LineOutcome, LineReader};
pub use tcp_connection::TcpConnection;
