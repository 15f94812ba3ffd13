//! C8 — Aggregator (`Aggie`).
//!
//! Owns the client set, the PM link, the poll schedule, the merge into the
//! fleet view, and the PM publish. The main loop is a single
//! `tokio::select!` between a 500 ms tick and a `Notify` that the inbound
//! message dispatcher signals when a client's list finishes — the literal
//! expression of "the condition-variable/mutex pair in the source is just
//! a bounded-wait signal" (Design Notes, `SPEC_FULL.md` §9).

use crate::clock::Stopwatch;
use crate::config::{read_clients_file, Config};
use crate::model::{Address, ClientNode};
use crate::ws::{WsClient, WsUrl};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client_state::WClient;

const TICK_INTERVAL: Duration = Duration::from_millis(500);
const INITIAL_POLL_DELAY: Duration = Duration::from_millis(10);
const POLL_COMMAND_GAP: Duration = Duration::from_millis(50);
const UNIT_SYMBOL: &str = "SFGPICU---Exxx";

/// Messages funneled from every client reader and the PM reader into a
/// single dispatcher task, replacing the source's two condvar-guarded
/// queues with one `mpsc` channel.
enum Inbound {
    Client { index: usize, line: String },
    Pm(String),
}

#[derive(Serialize)]
struct PmNode {
    #[serde(rename = "unitId")]
    unit_id: u32,
    #[serde(rename = "unitPos")]
    unit_pos: String,
    #[serde(rename = "unitSymbol")]
    unit_symbol: &'static str,
    #[serde(rename = "unitEnum")]
    unit_enum: &'static str,
    #[serde(rename = "unitAlt")]
    unit_alt: f64,
    #[serde(rename = "unitSpeed")]
    unit_speed: f64,
}

#[derive(Serialize)]
struct PmSnapshot {
    data: Vec<PmNode>,
}

impl From<&ClientNode> for PmNode {
    fn from(node: &ClientNode) -> Self {
        Self {
            unit_id: node.id,
            unit_pos: format!("{} {}", node.lat, node.lon),
            unit_symbol: UNIT_SYMBOL,
            unit_enum: "",
            unit_alt: 0.0,
            unit_speed: 0.0,
        }
    }
}

pub struct Aggregator {
    clients: RwLock<Vec<Arc<WClient>>>,
    clients_file: PathBuf,
    poll_interval: Duration,
    listen_port: u16,

    pm: tokio::sync::Mutex<Option<WsClient>>,

    aggregated_nodes: SyncMutex<BTreeMap<u32, ClientNode>>,
    new_data: Arc<AtomicBool>,
    wake: Arc<Notify>,

    running: AtomicBool,
    stopping: AtomicBool,
    started_at: Stopwatch,
    pm_connected_at: SyncMutex<Option<Stopwatch>>,
    last_pm_recv: SyncMutex<Option<Stopwatch>>,
    last_pm_send: SyncMutex<Option<Stopwatch>>,

    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Aggregator {
    pub async fn new(config: &Config) -> Result<Arc<Self>, crate::error::ConfigError> {
        let addresses = read_clients_file(&config.clients_file)?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let aggregator = Arc::new(Self {
            clients: RwLock::new(
                addresses.into_iter().map(|a| Arc::new(WClient::new(a))).collect(),
            ),
            clients_file: config.clients_file.clone(),
            poll_interval: config.poll_interval,
            listen_port: config.listen_port,
            pm: tokio::sync::Mutex::new(None),
            aggregated_nodes: SyncMutex::new(BTreeMap::new()),
            new_data: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            running: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            started_at: Stopwatch::start(),
            pm_connected_at: SyncMutex::new(None),
            last_pm_recv: SyncMutex::new(None),
            last_pm_send: SyncMutex::new(None),
            inbound_tx,
        });

        tokio::spawn(dispatch_loop(Arc::clone(&aggregator), inbound_rx));
        Ok(aggregator)
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Connects every configured client and starts its background reader.
    ///
    /// Returns `true` if at least one client connected, or if no clients
    /// were configured at all (there being none to fail on). Returns
    /// `false` only when clients are configured and every single one
    /// failed to connect, so the caller can treat the fleet as
    /// unreachable.
    pub async fn connect_clients(&self) -> bool {
        let clients = self.clients.read().await.clone();
        if clients.is_empty() {
            return true;
        }
        let mut any_connected = false;
        for (index, client) in clients.into_iter().enumerate() {
            let tx = self.inbound_tx.clone();
            match client.connect(move |line| {
                let _ = tx.send(Inbound::Client { index, line });
            }).await {
                Ok(()) => {
                    debug!(addr = %client.address(), "client connected");
                    any_connected = true;
                }
                Err(e) => warn!(addr = %client.address(), error = %e, "client connect failed"),
            }
        }
        any_connected
    }

    /// Connects to the PM over WebSocket and starts its background reader.
    pub async fn pm_connect(&self, url_str: &str) -> Result<(), crate::error::WsError> {
        let url = WsUrl::parse(url_str).map_err(|e| {
            crate::error::WsError::HandshakeFailed(e.to_string())
        })?;
        let mut client = WsClient::connect(url).await?;

        let tx = self.inbound_tx.clone();
        client.start_reader(move |text| {
            let _ = tx.send(Inbound::Pm(text));
        });

        *self.pm.lock().await = Some(client);
        *self.pm_connected_at.lock() = Some(Stopwatch::start());
        info!("connected to presentation manager");
        Ok(())
    }

    pub async fn pm_disconnect(&self) {
        if let Some(mut client) = self.pm.lock().await.take() {
            client.disconnect().await;
        }
        *self.pm_connected_at.lock() = None;
    }

    pub async fn pm_send_raw(&self, text: &str) -> Result<(), crate::error::WsError> {
        let guard = self.pm.lock().await;
        match guard.as_ref() {
            Some(client) => {
                client.send_text(text).await?;
                *self.last_pm_send.lock() = Some(Stopwatch::start());
                Ok(())
            }
            None => Err(crate::error::WsError::InvalidMessage),
        }
    }

    pub async fn pm_is_connected(&self) -> bool {
        self.pm
            .lock()
            .await
            .as_ref()
            .map(|c| c.state() == crate::ws::WsState::Open)
            .unwrap_or(false)
    }

    pub fn request_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn should_stop(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Rebuilds the fleet view from scratch and publishes it. Never
    /// carries stale members from a previous snapshot (§3 invariant).
    async fn rebuild_and_publish(&self) {
        let clients = self.clients.read().await.clone();
        let mut per_client = Vec::with_capacity(clients.len());
        for client in &clients {
            per_client.push(client.nodes_snapshot().await);
            client.take_data_changed().await;
        }
        let merged = merge_nodes(per_client);
        *self.aggregated_nodes.lock() = merged.clone();

        let snapshot = PmSnapshot {
            data: merged.values().map(PmNode::from).collect(),
        };
        match serde_json::to_string(&snapshot) {
            Ok(body) => {
                if let Err(e) = self.pm_send_raw(&body).await {
                    debug!(error = %e, "failed to publish snapshot to pm");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize fleet snapshot"),
        }
    }

    /// Issues `list cn`/`list configs`/`list connections` to every client,
    /// evicting one stale pending request first if needed, with a short
    /// gap between commands per client.
    pub async fn poll_cycle(&self) {
        let clients = self.clients.read().await.clone();
        for client in &clients {
            client.evict_stale(self.poll_interval).await;
            for command in ["list cn", "list configs", "list connections"] {
                if let Err(e) = client.issue(command).await {
                    debug!(addr = %client.address(), error = %e, "could not issue poll command");
                }
                time::sleep(POLL_COMMAND_GAP).await;
            }
        }
    }

    pub async fn reload_clients(&self) -> Result<(), crate::error::ConfigError> {
        let mut clients = self.clients.write().await;
        for client in clients.iter() {
            client.disconnect().await;
        }
        let addresses = read_clients_file(&self.clients_file)?;
        *clients = addresses.into_iter().map(|a| Arc::new(WClient::new(a))).collect();
        drop(clients);
        self.connect_clients().await;
        Ok(())
    }

    pub async fn clients_snapshot(&self) -> Vec<Arc<WClient>> {
        self.clients.read().await.clone()
    }

    pub async fn find_client(&self, host: &str, port: &str) -> Option<Arc<WClient>> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .find(|c| c.address() == &Address::new(host, port))
            .cloned()
    }

    pub fn aggregated_nodes(&self) -> Vec<ClientNode> {
        self.aggregated_nodes.lock().values().cloned().collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn pm_connected_elapsed(&self) -> Option<Duration> {
        self.pm_connected_at.lock().map(|sw| sw.elapsed())
    }

    pub fn last_pm_recv_elapsed(&self) -> Option<Duration> {
        self.last_pm_recv.lock().map(|sw| sw.elapsed())
    }

    pub fn last_pm_send_elapsed(&self) -> Option<Duration> {
        self.last_pm_send.lock().map(|sw| sw.elapsed())
    }

    /// The main aggregator loop: wakes on the 500 ms tick or on a
    /// `new_data`/shutdown signal, rebuilds + publishes when data changed,
    /// and counts down to the next poll cycle.
    pub async fn run(self: Arc<Self>) {
        time::sleep(INITIAL_POLL_DELAY).await;

        let mut tick = time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut countdown = self.poll_interval;

        loop {
            if self.should_stop() {
                self.running.store(false, Ordering::SeqCst);
                break;
            }

            tokio::select! {
                _ = tick.tick() => {}
                _ = self.wake.notified() => {}
            }

            if self.new_data.swap(false, Ordering::SeqCst) {
                self.rebuild_and_publish().await;
            }

            if !self.poll_interval.is_zero() {
                countdown = countdown.saturating_sub(TICK_INTERVAL);
                if countdown.is_zero() {
                    self.poll_cycle().await;
                    countdown = self.poll_interval;
                }
            }
        }
    }
}

/// Merges every client's current node list into one map keyed by node id.
/// Later clients in iteration order win ties on a shared id (§3: "the fleet
/// view is defined as the union at publish time", with no ordering
/// guarantee between clients), and `BTreeMap` keeps the published snapshot
/// in ascending id order.
fn merge_nodes(per_client: impl IntoIterator<Item = Vec<ClientNode>>) -> BTreeMap<u32, ClientNode> {
    let mut merged = BTreeMap::new();
    for nodes in per_client {
        for node in nodes {
            merged.insert(node.id, node);
        }
    }
    merged
}

/// Drains the single inbound channel fed by every client reader and the
/// PM reader, applying each line to the owning client's state.
async fn dispatch_loop(aggregator: Arc<Aggregator>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Inbound::Client { index, line } => {
                let clients = aggregator.clients.read().await;
                if let Some(client) = clients.get(index).cloned() {
                    drop(clients);
                    if client.handle_line(&line).await {
                        aggregator.new_data.store(true, Ordering::SeqCst);
                        aggregator.wake.notify_one();
                    }
                }
            }
            Inbound::Pm(text) => {
                *aggregator.last_pm_recv.lock() = Some(Stopwatch::start());
                debug!(%text, "received pm message (no command language defined; logged only)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, lat: f64) -> ClientNode {
        ClientNode {
            id,
            lat,
            ..ClientNode::default()
        }
    }

    #[test]
    fn merge_keeps_nodes_from_every_client() {
        let merged = merge_nodes(vec![vec![node(1, 1.0)], vec![node(2, 2.0)]]);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains_key(&1));
        assert!(merged.contains_key(&2));
    }

    #[test]
    fn merge_deduplicates_shared_ids_keeping_the_later_client() {
        let merged = merge_nodes(vec![vec![node(7, 1.0)], vec![node(7, 9.0)]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[&7].lat, 9.0);
    }

    #[test]
    fn merge_orders_by_ascending_id_regardless_of_input_order() {
        let merged = merge_nodes(vec![vec![node(5, 0.0), node(1, 0.0), node(3, 0.0)]]);
        let ids: Vec<u32> = merged.keys().copied().collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn snapshot_serializes_with_the_expected_field_names() {
        let mut nodes = BTreeMap::new();
        nodes.insert(7, ClientNode { id: 7, lat: 59.9, lon: 10.7, ..ClientNode::default() });
        let snapshot = PmSnapshot {
            data: nodes.values().map(PmNode::from).collect(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"unitId\":7"));
        assert!(json.contains("\"unitPos\":\"59.9 10.7\""));
        assert!(json.contains("\"unitSymbol\":\"SFGPICU---Exxx\""));
        assert!(json.contains("\"unitEnum\":\"\""));
    }

    #[tokio::test]
    async fn new_aggregator_has_no_clients_from_an_empty_file() {
        let path = std::env::temp_dir().join(format!(
            "aggie-aggregator-test-{}.txt",
            std::process::id()
        ));
        std::fs::write(&path, "").unwrap();
        let config = Config {
            pm_url: "ws://127.0.0.1:1/pm".to_string(),
            verbosity: 0,
            clients_file: path,
            listen_port: 0,
            poll_interval: Duration::from_secs(5),
        };
        let aggregator = Aggregator::new(&config).await.unwrap();
        assert!(aggregator.clients_snapshot().await.is_empty());
        assert!(aggregator.aggregated_nodes().is_empty());
    }
}
