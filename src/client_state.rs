//! C6 — Client State (`WClient`).
//!
//! One record per fleet member. All mutable state lives behind a single
//! `tokio::sync::Mutex` so that "send a command" and "enqueue it in
//! `request_queue`" happen as one atomic step with respect to other tasks
//! observing the queue (§3, §5) — an async mutex, not `parking_lot`'s sync
//! one, because the critical section spans the `.await` on the socket
//! write.

use crate::clock::Stopwatch;
use crate::error::ConnectError;
use crate::model::{Address, ClientNode, ColumnSchema, Configuration, Connection, ListKind};
use crate::net::TcpConnection;
use crate::reply_parser::{
    self, apply_schema, parse_config_row, parse_connection_row, parse_node_row, parse_reply_line,
    ReplyEffect, BANNER, BUSY, COMMAND_OUTPUT, DISCONNECTING, HELP, PARSE_ERROR_A, PARSE_ERROR_B,
    READY,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const CLIENT_EOL: &str = "\r\n";

struct Inner {
    conn: Option<TcpConnection>,
    schema: ColumnSchema,
    nodes: Vec<ClientNode>,
    configs: Vec<Configuration>,
    connections: Vec<Connection>,
    nodes_finished: bool,
    configs_finished: bool,
    connections_finished: bool,
    request_queue: VecDeque<String>,
    last_sent: Stopwatch,
    last_recv: Stopwatch,
    data_changed: bool,
}

impl Inner {
    fn finished_flag(&mut self, kind: ListKind) -> &mut bool {
        match kind {
            ListKind::ClientNodes => &mut self.nodes_finished,
            ListKind::Configs => &mut self.configs_finished,
            ListKind::Connections => &mut self.connections_finished,
        }
    }
}

pub struct WClient {
    addr: Address,
    inner: Mutex<Inner>,
}

impl WClient {
    pub fn new(addr: Address) -> Self {
        Self {
            addr,
            inner: Mutex::new(Inner {
                conn: None,
                schema: ColumnSchema::default(),
                nodes: Vec::new(),
                configs: Vec::new(),
                connections: Vec::new(),
                // start "finished" so the first row of the first list
                // clears the (already empty) vector and begins a new one.
                nodes_finished: true,
                configs_finished: true,
                connections_finished: true,
                request_queue: VecDeque::new(),
                last_sent: Stopwatch::start(),
                last_recv: Stopwatch::start(),
                data_changed: false,
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.addr
    }

    /// Connects (or reconnects) the underlying TCP connection and starts
    /// its background reader, which forwards every line to `on_line`.
    pub async fn connect<F>(&self, on_line: F) -> Result<(), ConnectError>
    where
        F: Fn(String) + Send + 'static,
    {
        let mut conn = TcpConnection::connect(&self.addr, CLIENT_EOL).await?;
        conn.start_reader(on_line);
        let mut inner = self.inner.lock().await;
        inner.conn = Some(conn);
        inner.last_recv.restart();
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.conn.as_ref().is_some_and(TcpConnection::is_connected)
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut conn) = inner.conn.take() {
            conn.disconnect().await;
        }
    }

    /// Evicts one stale pending request if the client hasn't replied in
    /// too long, per the staleness-eviction rule (§4.5). Called right
    /// before issuing a new poll command.
    pub async fn evict_stale(&self, poll_interval: Duration) {
        let mut inner = self.inner.lock().await;
        let threshold = poll_interval / 2;
        let threshold = threshold.max(Duration::from_secs(1));
        if inner.last_recv.elapsed() > threshold && !inner.request_queue.is_empty() {
            let dropped = inner.request_queue.pop_front();
            debug!(addr = %self.addr, command = ?dropped, "evicted stale pending request");
        }
    }

    /// Sends `command` and enqueues it atomically with respect to any
    /// other task observing `request_queue`.
    pub async fn issue(&self, command: &str) -> Result<(), ConnectError> {
        let mut inner = self.inner.lock().await;
        match &inner.conn {
            None => Err(ConnectError::NotConnected),
            Some(conn) => {
                conn.send(command).await?;
                inner.request_queue.push_back(command.to_string());
                inner.last_sent.restart();
                Ok(())
            }
        }
    }

    /// Applies one inbound reply line to this client's state. Returns
    /// `true` if a list finished (the aggregator should be woken).
    pub async fn handle_line(&self, line: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.last_recv.restart();

        let reply = match parse_reply_line(line) {
            Some(r) => r,
            None => {
                debug!(addr = %self.addr, %line, "unparseable reply line");
                return false;
            }
        };

        let effect = match reply.code {
            HELP => {
                inner.schema = apply_schema(&reply.tokens);
                ReplyEffect::None
            }
            COMMAND_OUTPUT => {
                apply_row(&mut inner, &reply.tokens);
                ReplyEffect::None
            }
            READY => {
                if let Some(command) = inner.request_queue.pop_front() {
                    if let Some(kind) = reply_parser::list_kind_of(&command) {
                        *inner.finished_flag(kind) = true;
                        inner.data_changed = true;
                    }
                }
                ReplyEffect::ListFinished
            }
            BANNER => ReplyEffect::None,
            DISCONNECTING => {
                debug!(addr = %self.addr, "peer requested disconnect");
                ReplyEffect::None
            }
            PARSE_ERROR_A | PARSE_ERROR_B => {
                debug!(addr = %self.addr, code = reply.code, "client reported a parse error");
                ReplyEffect::None
            }
            BUSY => {
                warn!(addr = %self.addr, "busy; disconnecting");
                inner.request_queue.pop_front();
                ReplyEffect::ForceDisconnect
            }
            other => {
                debug!(addr = %self.addr, code = other, "unrecognized reply code");
                ReplyEffect::None
            }
        };

        let should_disconnect = effect == ReplyEffect::ForceDisconnect;
        let woke = inner.data_changed;
        drop(inner);

        if should_disconnect {
            self.disconnect().await;
        }
        woke
    }

    pub async fn take_data_changed(&self) -> bool {
        let mut inner = self.inner.lock().await;
        std::mem::take(&mut inner.data_changed)
    }

    pub async fn nodes_snapshot(&self) -> Vec<ClientNode> {
        self.inner.lock().await.nodes.clone()
    }

    pub async fn last_sent_elapsed(&self) -> Duration {
        self.inner.lock().await.last_sent.elapsed()
    }

    pub async fn last_recv_elapsed(&self) -> Duration {
        self.inner.lock().await.last_recv.elapsed()
    }
}

fn apply_row(inner: &mut Inner, tokens: &[String]) {
    let kind = match inner.request_queue.front().and_then(|c| reply_parser::list_kind_of(c)) {
        Some(kind) => kind,
        None => return, // no pending request for this row; discard
    };

    match kind {
        ListKind::ClientNodes => {
            if std::mem::replace(&mut inner.nodes_finished, false) {
                inner.nodes.clear();
            }
            inner.nodes.push(parse_node_row(&inner.schema, tokens));
        }
        ListKind::Configs => {
            if std::mem::replace(&mut inner.configs_finished, false) {
                inner.configs.clear();
            }
            inner.configs.push(parse_config_row(&inner.schema, tokens));
        }
        ListKind::Connections => {
            if std::mem::replace(&mut inner.connections_finished, false) {
                inner.connections.clear();
            }
            inner
                .connections
                .push(parse_connection_row(&inner.schema, tokens));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_then_rows_then_ready_produces_exact_rows() {
        let client = WClient::new(Address::new("127.0.0.1", "0"));
        {
            let mut inner = client.inner.lock().await;
            inner.request_queue.push_back("list cn".to_string());
        }
        client.handle_line("214 ID LAT LON").await;
        client.handle_line("201 7 59.9 10.7").await;
        client.handle_line("201 8 10.0 20.0").await;
        let finished = client.handle_line("200").await;

        assert!(finished);
        let nodes = client.nodes_snapshot().await;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, 7);
        assert_eq!(nodes[1].id, 8);
    }

    #[tokio::test]
    async fn second_cycle_replaces_rows_without_stale_leftovers() {
        let client = WClient::new(Address::new("127.0.0.1", "0"));
        {
            let mut inner = client.inner.lock().await;
            inner.request_queue.push_back("list cn".to_string());
        }
        client.handle_line("214 ID").await;
        client.handle_line("201 1").await;
        client.handle_line("200").await;
        assert_eq!(client.nodes_snapshot().await.len(), 1);

        {
            let mut inner = client.inner.lock().await;
            inner.request_queue.push_back("list cn".to_string());
        }
        client.handle_line("201 2").await;
        client.handle_line("200").await;

        let nodes = client.nodes_snapshot().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, 2);
    }

    #[tokio::test]
    async fn row_with_no_pending_request_is_discarded() {
        let client = WClient::new(Address::new("127.0.0.1", "0"));
        client.handle_line("201 99").await;
        assert!(client.nodes_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn busy_discards_request_without_rows() {
        let client = WClient::new(Address::new("127.0.0.1", "0"));
        {
            let mut inner = client.inner.lock().await;
            inner.request_queue.push_back("list cn".to_string());
        }
        client.handle_line("500").await;
        let inner = client.inner.lock().await;
        assert!(inner.request_queue.is_empty());
    }
}
