//! C3 — TCP Client Connection.
//!
//! Connects to a client's `host:port`, writes line-oriented commands, and
//! runs a single background reader that delivers whole lines to a callback.
//! The callback dispatch across threads is a channel-send in disguise: the
//! caller supplies a closure that forwards into a single inbound `mpsc`
//! channel (see Design Notes in `SPEC_FULL.md`), not a raw cross-thread
//! pointer.

use crate::error::ConnectError;
use crate::model::Address;
use crate::net::line_reader::{LineOutcome, LineReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READER_TIMEOUT: Duration = Duration::from_millis(1000);

/// A connection to one radio client. Reconnecting after a disconnect
/// constructs a new `TcpConnection`; the owning `WClient` record survives.
pub struct TcpConnection {
    addr: Address,
    eol: &'static str,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
    read_half: Option<OwnedReadHalf>,
    running: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
}

impl TcpConnection {
    /// Resolves `addr` (IPv4 or IPv6) and connects to the first candidate
    /// that accepts, with `eol` as the line terminator used by `send` —
    /// `"\r\n"` for the client protocol. The WebSocket handshake doesn't
    /// go through `TcpConnection::send` at all, so no `eol` value here
    /// represents it.
    pub async fn connect(addr: &Address, eol: &'static str) -> Result<Self, ConnectError> {
        if addr.host.is_empty() {
            return Err(ConnectError::MissingDestination);
        }
        if addr.port.is_empty() {
            return Err(ConnectError::MissingDestinationPort);
        }

        let candidates = tokio::net::lookup_host(addr.socket_addr_str())
            .await
            .map_err(|_| ConnectError::CouldNotConnect(addr.to_string()))?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    let (read_half, write_half) = stream.into_split();
                    return Ok(Self {
                        addr: addr.clone(),
                        eol,
                        write_half: Arc::new(Mutex::new(Some(write_half))),
                        read_half: Some(read_half),
                        running: Arc::new(AtomicBool::new(true)),
                        reader_task: None,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        warn!(%addr, error = ?last_err, "could not connect to client");
        Err(ConnectError::CouldNotConnect(addr.to_string()))
    }

    pub fn address(&self) -> &Address {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sends a line, appending the configured end-of-line marker. A broken
    /// pipe is reported as an error but never aborts the process. Holding
    /// the write half behind a `tokio::sync::Mutex` (rather than a
    /// synchronous one) serializes concurrent senders without blocking a
    /// worker thread across the `.await`.
    pub async fn send(&self, line: &str) -> Result<(), ConnectError> {
        let mut guard = self.write_half.lock().await;
        match guard.as_mut() {
            None => Err(ConnectError::NotConnected),
            Some(write_half) => {
                let mut payload = Vec::with_capacity(line.len() + self.eol.len());
                payload.extend_from_slice(line.as_bytes());
                payload.extend_from_slice(self.eol.as_bytes());
                match write_half.write_all(&payload).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        self.running.store(false, Ordering::SeqCst);
                        Err(ConnectError::SocketError(e))
                    }
                }
            }
        }
    }

    /// Spawns the single background reader for this connection. `on_line`
    /// is invoked for every non-empty line; a fatal socket error stops the
    /// reader and marks the connection as down.
    pub fn start_reader<F>(&mut self, on_line: F)
    where
        F: Fn(String) + Send + 'static,
    {
        let read_half = match self.read_half.take() {
            Some(r) => r,
            None => return, // already started, or never connected
        };
        let running = Arc::clone(&self.running);
        let addr = self.addr.clone();

        let handle = tokio::spawn(async move {
            let mut reader = LineReader::new(read_half);
            while running.load(Ordering::SeqCst) {
                match reader.read_line(READER_TIMEOUT).await {
                    Ok(LineOutcome::Line(line)) => {
                        if !line.is_empty() {
                            on_line(line);
                        }
                    }
                    Ok(LineOutcome::Timeout) => continue,
                    Err(e) => {
                        debug!(%addr, error = %e, "client reader stopped");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        self.reader_task = Some(handle);
    }

    /// Stops the reader (waiting for it to exit), closes the handle, and is
    /// safe to call more than once.
    pub async fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.write_half.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn sends_with_configured_eol_and_delivers_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"list cn\r\n");
            socket.write_all(b"200 ready\n").await.unwrap();
        });

        let addr = Address::new(local_addr.ip().to_string(), local_addr.port().to_string());
        let mut conn = TcpConnection::connect(&addr, "\r\n").await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        let received_clone = Arc::clone(&received);
        let notify_clone = Arc::clone(&notify);
        conn.start_reader(move |line| {
            assert_eq!(line, "200 ready");
            received_clone.fetch_add(1, Ordering::SeqCst);
            notify_clone.notify_one();
        });

        conn.send("list cn").await.unwrap();
        notify.notified().await;
        server.await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn connect_fails_fast_on_missing_destination() {
        let addr = Address::new("", "1234");
        let err = TcpConnection::connect(&addr, "\n").await.unwrap_err();
        assert!(matches!(err, ConnectError::MissingDestination));
    }
}
