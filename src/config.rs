//! Ambient configuration: CLI flags, defaults, and the clients file reader.

use crate::error::ConfigError;
use crate::model::Address;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CLIENTS_FILE: &str = "clients.txt";
const DEFAULT_LISTEN_PORT: u16 = 17408;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Polls a fleet of radio clients and republishes a merged node view to a
/// presentation manager over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "aggie", version, about)]
struct Cli {
    /// Presentation manager URL, e.g. ws://localhost:8080/pm
    pm_url: String,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity (repeatable)
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    quiet: u8,

    /// Path to the clients file
    #[arg(short = 'c', long = "clients", default_value = DEFAULT_CLIENTS_FILE)]
    clients: PathBuf,

    /// Port the operator control server listens on
    #[arg(short = 'l', long = "listen-port", default_value_t = DEFAULT_LISTEN_PORT)]
    listen_port: u16,

    /// Seconds between poll cycles
    #[arg(short = 'p', long = "poll-interval", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pm_url: String,
    pub verbosity: i8,
    pub clients_file: PathBuf,
    pub listen_port: u16,
    pub poll_interval: Duration,
}

impl Config {
    /// Parses `argv`, reporting clap's own usage/version/help exits the
    /// normal way (clap calls `process::exit` for those internally).
    pub fn parse() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        if cli.pm_url.trim().is_empty() {
            return Err(ConfigError::MissingPmUrl);
        }
        Ok(Self {
            pm_url: cli.pm_url,
            verbosity: cli.verbose as i8 - cli.quiet as i8,
            clients_file: cli.clients,
            listen_port: cli.listen_port,
            poll_interval: Duration::from_secs(cli.poll_interval),
        })
    }
}

/// Reads a clients file: one `HOST PORT` pair per line, blank lines and
/// lines starting with `#` ignored.
pub fn read_clients_file(path: &Path) -> Result<Vec<Address>, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::ClientsFileNotFound(path.display().to_string()))?;

    let mut addresses = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Address::parse(line) {
            Some(addr) => addresses.push(addr),
            None => return Err(ConfigError::InvalidClientLine(line.to_string())),
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "aggie-test-clients-{}-{}.txt",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_hosts_and_skips_comments_and_blanks() {
        let path = write_temp("# clients\n10.0.0.1 4001\n\n10.0.0.2 4002\n");
        let addrs = read_clients_file(&path).unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].host, "10.0.0.1");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_malformed_line() {
        let path = write_temp("not-a-valid-line\n");
        let err = read_clients_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidClientLine(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_reported() {
        let err = read_clients_file(Path::new("/nonexistent/clients.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::ClientsFileNotFound(_)));
    }
}
