//! C5 — Line-Control Server.
//!
//! Listens on a local port, accepts any number of concurrent operator
//! sessions, and runs each on its own task so that one misbehaving peer
//! cannot stall another.

use crate::aggregator::Aggregator;
use crate::control::dispatcher;
use crate::net::line_reader::{LineOutcome, LineReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const BANNER: &str = "aggie control server\n";
const PROMPT: &str = "> ";
const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct ControlServer {
    listener: TcpListener,
}

impl ControlServer {
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self { listener })
    }

    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default()
    }

    /// Accepts sessions until `shutdown` is signalled.
    pub async fn run(self, aggregator: Arc<Aggregator>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer_addr)) => {
                            let aggregator = Arc::clone(&aggregator);
                            let shutdown = shutdown.clone();
                            tokio::spawn(run_session(socket, peer_addr, aggregator, shutdown));
                        }
                        Err(e) => warn!(error = %e, "control server accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

async fn run_session(
    socket: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    aggregator: Arc<Aggregator>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%peer_addr, "control session opened");
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = LineReader::new(read_half);

    if write_half.write_all(BANNER.as_bytes()).await.is_err() {
        return;
    }
    if write_half.write_all(PROMPT.as_bytes()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            line = reader.read_line(SESSION_READ_TIMEOUT) => {
                match line {
                    Ok(LineOutcome::Line(text)) => {
                        if text.trim().is_empty() {
                            if write_half.write_all(PROMPT.as_bytes()).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        let outcome = dispatcher::handle(&aggregator, &text).await;
                        if !outcome.reply.is_empty()
                            && write_half.write_all(outcome.reply.as_bytes()).await.is_err()
                        {
                            break;
                        }
                        if outcome.close_session {
                            break;
                        }
                        if write_half.write_all(PROMPT.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Ok(LineOutcome::Timeout) => continue,
                    Err(e) => {
                        debug!(%peer_addr, error = %e, "control session closed");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = write_half.write_all(b"Shutting down.\n").await;
                    break;
                }
            }
        }
    }
    info!(%peer_addr, "control session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::TcpStream;

    async fn test_aggregator() -> Arc<Aggregator> {
        let path = std::env::temp_dir().join(format!(
            "aggie-server-test-{}.txt",
            std::process::id()
        ));
        std::fs::write(&path, "").unwrap();
        let config = Config {
            pm_url: "ws://127.0.0.1:1/pm".to_string(),
            verbosity: 0,
            clients_file: PathBuf::from(&path),
            listen_port: 0,
            poll_interval: Duration::from_secs(5),
        };
        Aggregator::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn serves_banner_prompt_and_status_reply() {
        let server = ControlServer::bind(0).await.unwrap();
        let port = server.local_port();
        let aggregator = test_aggregator().await;
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(server.run(aggregator, rx));

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut banner = String::new();
        reader.read_line(&mut banner).await.unwrap();
        assert_eq!(banner, BANNER);

        let mut prompt = [0u8; 2];
        reader.read_exact(&mut prompt).await.unwrap();
        assert_eq!(&prompt, b"> ");

        write_half.write_all(b"status\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("Uptime:"));
    }
}
