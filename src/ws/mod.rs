//! C4 — WebSocket Client.
//!
//! A TEXT-only RFC 6455 client endpoint used to talk to the presentation
//! manager (PM). State machine: `Disconnected -> Connecting -> Handshaking
//! -> Open -> Closing -> Disconnected`; any error during `Connecting` or
//! `Handshaking` drops straight back to `Disconnected` without leaving a
//! half-open TCP socket.

mod frame;

pub use frame::{encode_text_frame, read_frame, Frame, Opcode};

use crate::error::{ConfigError, WsError};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::net::line_reader::{LineOutcome, LineReader};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const READER_TIMEOUT: Duration = Duration::from_millis(250);

/// A parsed `ws://host:port/path` URL. Only the `ws` scheme is supported —
/// this client never encrypts traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: String,
    pub path: String,
}

impl WsUrl {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let rest = s
            .strip_prefix("ws://")
            .ok_or_else(|| ConfigError::InvalidPmUrl(s.to_string()))?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx + 1..].to_string()),
            None => (rest, String::new()),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidPmUrl(s.to_string()))?;
        if host.is_empty() || port.is_empty() {
            return Err(ConfigError::InvalidPmUrl(s.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port: port.to_string(),
            path,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Open,
}

pub struct WsClient {
    url: WsUrl,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
    read_half: Option<OwnedReadHalf>,
    running: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
}

impl WsClient {
    /// Performs the TCP connect and the HTTP/1.1 upgrade handshake. On any
    /// failure the socket is dropped and `Disconnected` is the resulting
    /// state (no half-open connection is left behind).
    pub async fn connect(url: WsUrl) -> Result<Self, WsError> {
        let mut stream = TcpStream::connect((url.host.as_str(), url.port.parse::<u16>().unwrap_or(0)))
            .await
            .map_err(WsError::SocketError)?;
        stream.set_nodelay(true).ok();

        handshake(&mut stream, &url).await?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            url,
            write_half: Arc::new(Mutex::new(Some(write_half))),
            read_half: Some(read_half),
            running: Arc::new(AtomicBool::new(true)),
            reader_task: None,
        })
    }

    pub fn state(&self) -> WsState {
        if self.running.load(Ordering::SeqCst) {
            WsState::Open
        } else {
            WsState::Disconnected
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), WsError> {
        let mut guard = self.write_half.lock().await;
        match guard.as_mut() {
            None => Err(WsError::SocketError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "websocket not connected",
            ))),
            Some(write_half) => {
                let frame = encode_text_frame(text.as_bytes());
                match write_half.write_all(&frame).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        self.running.store(false, Ordering::SeqCst);
                        Err(WsError::SocketError(e))
                    }
                }
            }
        }
    }

    /// Spawns the frame reader. `PING`/`PONG` are silently discarded,
    /// `CLOSE` is treated as a disconnect, any other non-TEXT opcode is a
    /// fatal `INVALID_MESSAGE`, and `on_text` is invoked for each complete
    /// TEXT payload.
    pub fn start_reader<F>(&mut self, on_text: F)
    where
        F: Fn(String) + Send + 'static,
    {
        let read_half = match self.read_half.take() {
            Some(r) => r,
            None => return,
        };
        let running = Arc::clone(&self.running);
        let mut read_half = read_half;

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match tokio::time::timeout(READER_TIMEOUT, read_frame(&mut read_half)).await {
                    Err(_elapsed) => continue,
                    Ok(Ok(frame)) => match frame.opcode {
                        Opcode::Text => {
                            let text = String::from_utf8_lossy(&frame.payload).into_owned();
                            on_text(text);
                        }
                        Opcode::Ping | Opcode::Pong => continue,
                        Opcode::Close => {
                            debug!("websocket peer sent CLOSE");
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                        _ => {
                            warn!("websocket received invalid message opcode");
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    },
                    Ok(Err(e)) => {
                        debug!(error = %e, "websocket reader stopped");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        self.reader_task = Some(handle);
    }

    pub async fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.write_half.lock().await.take();
    }

    pub fn url(&self) -> &WsUrl {
        &self.url
    }
}

async fn handshake(stream: &mut TcpStream, url: &WsUrl) -> Result<(), WsError> {
    let mut key_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut key_bytes);
    let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

    let request = format!(
        "GET ws://{host}:{port}/{path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        host = url.host,
        port = url.port,
        path = url.path,
        key = key,
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(WsError::SocketError)?;

    let mut reader = LineReader::new(&mut *stream);
    let mut status_line: Option<String> = None;
    loop {
        match reader.read_line(HANDSHAKE_TIMEOUT).await {
            Ok(LineOutcome::Line(line)) => {
                if status_line.is_none() {
                    status_line = Some(line.clone());
                }
                if line.is_empty() {
                    break;
                }
            }
            Ok(LineOutcome::Timeout) => {
                return Err(WsError::HandshakeFailed(
                    "timed out waiting for handshake response".to_string(),
                ))
            }
            Err(e) => return Err(WsError::HandshakeFailed(e.to_string())),
        }
    }

    match status_line {
        Some(line) if line.starts_with("HTTP/1.1 101") => Ok(()),
        Some(line) => Err(WsError::HandshakeFailed(line)),
        None => Err(WsError::HandshakeFailed("empty handshake response".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    #[test]
    fn parses_ws_url() {
        let url = WsUrl::parse("ws://10.0.0.1:9000/pm").unwrap();
        assert_eq!(url.host, "10.0.0.1");
        assert_eq!(url.port, "9000");
        assert_eq!(url.path, "pm");
    }

    #[test]
    fn rejects_non_ws_scheme() {
        assert!(WsUrl::parse("http://host:1/a").is_err());
    }

    #[tokio::test]
    async fn performs_handshake_and_sends_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut total = 0;
            // read until blank line (\r\n\r\n)
            loop {
                let n = socket.read(&mut buf[total..]).await.unwrap();
                total += n;
                if buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
                .await
                .unwrap();

            let mut header = [0u8; 2];
            socket.read_exact(&mut header).await.unwrap();
            let len = (header[1] & 0x7F) as usize;
            let mut mask = [0u8; 4];
            socket.read_exact(&mut mask).await.unwrap();
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).await.unwrap();
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= mask[i % 4];
            }
            payload
        });

        let url = WsUrl {
            host: local_addr.ip().to_string(),
            port: local_addr.port().to_string(),
            path: String::new(),
        };
        let client = WsClient::connect(url).await.unwrap();
        assert_eq!(client.state(), WsState::Open);
        client.send_text("hello pm").await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, b"hello pm");
    }
}
