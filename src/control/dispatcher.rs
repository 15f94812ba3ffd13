//! C9 — Control Dispatcher.
//!
//! Maps one operator command line to an `Aggregator` action and formats the
//! reply text. Pure with respect to I/O — the caller owns the socket.

use crate::aggregator::Aggregator;
use crate::error::ControlError;
use std::fmt::Write as _;

const HELP_TEXT: &str = "\
Commands:
  help, ?                              this text
  status                               uptime, pm link, client counts
  status clients                       per-client connect state
  status client <host> <port>          one client's connect state
  list clients                         current fleet view
  poll clients                         force an immediate poll cycle
  reload clients                       disconnect, re-read clients file, reconnect
  pm connect <url>                     connect to the presentation manager
  pm disconnect                        disconnect from the presentation manager
  pm send <text>                       send a raw message to the presentation manager
  shutdown                             stop the aggregator main loop
  close, quit                          end this session
";

/// The dispatcher's verdict: reply text to write back, and whether the
/// session should close after writing it.
pub struct Outcome {
    pub reply: String,
    pub close_session: bool,
}

fn reply(text: impl Into<String>) -> Outcome {
    Outcome {
        reply: text.into(),
        close_session: false,
    }
}

pub async fn handle(aggregator: &Aggregator, line: &str) -> Outcome {
    // Original-case words are kept for parameters (hostnames, URLs, PM
    // text); only the command keywords themselves are matched
    // case-insensitively.
    let words: Vec<&str> = line.split_whitespace().collect();
    let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let kw: Vec<&str> = lowered.iter().map(String::as_str).collect();

    match kw.as_slice() {
        ["help"] | ["?"] => reply(HELP_TEXT),
        ["status"] => reply(status_summary(aggregator).await),
        ["status", "clients"] => reply(status_clients(aggregator).await),
        ["status", "client", _, _] => status_client(aggregator, words[2], words[3]).await,
        ["status", "client", ..] => reply(format!("{}\n", ControlError::MissingParameters)),
        ["list", "clients"] => reply(list_clients(aggregator)),
        ["poll", "clients"] => {
            aggregator.poll_cycle().await;
            reply("Poll cycle issued.\n")
        }
        ["reload", "clients"] => match aggregator.reload_clients().await {
            Ok(()) => reply("Clients reloaded.\n"),
            Err(e) => reply(format!("Reload failed: {e}\n")),
        },
        ["pm", "connect", _] => match aggregator.pm_connect(words[2]).await {
            Ok(()) => reply("Connected to presentation manager.\n"),
            Err(e) => reply(format!("Connect failed: {e}\n")),
        },
        ["pm", "connect", ..] => reply(format!("{}\n", ControlError::MissingParameters)),
        ["pm", "disconnect"] => {
            aggregator.pm_disconnect().await;
            reply("Disconnected from presentation manager.\n")
        }
        ["pm", "send", ..] => {
            let text = line.splitn(3, char::is_whitespace).nth(2).unwrap_or("");
            match aggregator.pm_send_raw(text).await {
                Ok(()) => reply("Sent.\n"),
                Err(e) => reply(format!("Send failed: {e}\n")),
            }
        }
        ["shutdown"] => {
            aggregator.request_shutdown();
            reply("Aggregator main loop stopping.\n")
        }
        ["close"] | ["quit"] => Outcome {
            reply: String::new(),
            close_session: true,
        },
        _ => reply(format!("{}\n", ControlError::UnknownCommand)),
    }
}

async fn status_summary(aggregator: &Aggregator) -> String {
    let clients = aggregator.clients_snapshot().await;
    let mut connected = 0;
    for client in &clients {
        if client.is_connected().await {
            connected += 1;
        }
    }
    let pm_line = if aggregator.pm_is_connected().await {
        format!(
            "Connected to PM ({} ago)\n",
            humanize(aggregator.pm_connected_elapsed().unwrap_or_default())
        )
    } else {
        "Not connected to PM\n".to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "Uptime: {}", humanize(aggregator.uptime()));
    let _ = writeln!(
        out,
        "Main loop: {}",
        if aggregator.is_running() { "running" } else { "stopped" }
    );
    out.push_str(&pm_line);
    match aggregator.last_pm_recv_elapsed() {
        Some(d) => {
            let _ = writeln!(out, "Last PM recv: {} ago", humanize(d));
        }
        None => out.push_str("Last PM recv: never\n"),
    }
    match aggregator.last_pm_send_elapsed() {
        Some(d) => {
            let _ = writeln!(out, "Last PM send: {} ago", humanize(d));
        }
        None => out.push_str("Last PM send: never\n"),
    }
    let _ = writeln!(
        out,
        "Clients connected: {} of {}",
        connected,
        clients.len()
    );
    out
}

async fn status_clients(aggregator: &Aggregator) -> String {
    let clients = aggregator.clients_snapshot().await;
    let mut out = String::new();
    for client in &clients {
        let connected = client.is_connected().await;
        let _ = writeln!(
            out,
            "{}  {}  last_send={}  last_recv={}",
            client.address(),
            if connected { "connected" } else { "disconnected" },
            humanize(client.last_sent_elapsed().await),
            humanize(client.last_recv_elapsed().await),
        );
    }
    if out.is_empty() {
        out.push_str("No clients configured.\n");
    }
    out
}

async fn status_client(aggregator: &Aggregator, host: &str, port: &str) -> Outcome {
    match aggregator.find_client(host, port).await {
        Some(client) => {
            let connected = client.is_connected().await;
            reply(format!(
                "{}  {}  last_send={}  last_recv={}\n",
                client.address(),
                if connected { "connected" } else { "disconnected" },
                humanize(client.last_sent_elapsed().await),
                humanize(client.last_recv_elapsed().await),
            ))
        }
        None => reply(format!(
            "{}\n",
            ControlError::ClientNotFound(host.to_string(), port.to_string())
        )),
    }
}

fn list_clients(aggregator: &Aggregator) -> String {
    let nodes = aggregator.aggregated_nodes();
    if nodes.is_empty() {
        return "No nodes in the fleet view.\n".to_string();
    }
    let mut out = String::new();
    for node in nodes {
        let _ = writeln!(
            out,
            "id={} age={} cr={} lat={} lon={}",
            node.id, node.age, node.cr, node.lat, node.lon
        );
    }
    out
}

fn humanize(d: std::time::Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;
    use std::time::Duration;

    async fn test_aggregator() -> std::sync::Arc<Aggregator> {
        let path = std::env::temp_dir().join(format!(
            "aggie-dispatcher-test-{}.txt",
            std::process::id()
        ));
        std::fs::write(&path, "").unwrap();
        let config = Config {
            pm_url: "ws://127.0.0.1:1/pm".to_string(),
            verbosity: 0,
            clients_file: PathBuf::from(&path),
            listen_port: 17408,
            poll_interval: Duration::from_secs(5),
        };
        Aggregator::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let aggregator = test_aggregator().await;
        let outcome = handle(&aggregator, "bogus").await;
        assert!(outcome.reply.starts_with("Unknown command"));
        assert!(!outcome.close_session);
    }

    #[tokio::test]
    async fn status_reports_no_pm_link_initially() {
        let aggregator = test_aggregator().await;
        let outcome = handle(&aggregator, "status").await;
        assert!(outcome.reply.contains("Not connected to PM"));
    }

    #[tokio::test]
    async fn quit_closes_the_session() {
        let aggregator = test_aggregator().await;
        let outcome = handle(&aggregator, "quit").await;
        assert!(outcome.close_session);
    }

    #[tokio::test]
    async fn status_client_reports_not_found() {
        let aggregator = test_aggregator().await;
        let outcome = handle(&aggregator, "status client 10.0.0.9 4000").await;
        assert!(outcome.reply.contains("not found"));
    }
}
