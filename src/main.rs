use aggie::aggregator::Aggregator;
use aggie::config::Config;
use aggie::control::ControlServer;
use aggie::logging;
use color_eyre::eyre::{Result, WrapErr};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const FORCE_EXIT_WINDOW: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().ok();

    let config = match Config::parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("aggie: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.verbosity);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let aggregator = Aggregator::new(&config)
        .await
        .wrap_err("failed to start aggregator")?;
    if !aggregator.connect_clients().await {
        error!("no configured clients were reachable");
        return Err(color_eyre::eyre::eyre!("no clients reachable"));
    }

    if let Err(e) = aggregator.pm_connect(&config.pm_url).await {
        info!(error = %e, "presentation manager not reachable at startup; will retry via control commands");
    }

    let control_server = ControlServer::bind(config.listen_port)
        .await
        .wrap_err("failed to bind control server")?;
    info!(port = control_server.local_port(), "control server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let main_loop = tokio::spawn(Aggregator::run(aggregator.clone()));
    let control_loop = tokio::spawn(control_server.run(aggregator.clone(), shutdown_rx));

    wait_for_ctrl_c().await;
    info!("shutdown requested");
    aggregator.request_shutdown();
    let _ = shutdown_tx.send(true);

    main_loop.abort();
    control_loop.abort();
    Ok(())
}

/// Waits for the first Ctrl-C. If a second arrives within
/// [`FORCE_EXIT_WINDOW`], exits the process immediately instead of waiting
/// for graceful teardown.
async fn wait_for_ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("aggie: second interrupt received, forcing exit");
            std::process::exit(1);
        }
        _ = tokio::time::sleep(FORCE_EXIT_WINDOW) => {}
    }
}
