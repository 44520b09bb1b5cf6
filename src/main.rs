//! rtc-relay - Main entry point
//!
//! WebRTC signaling relay: accepts WebSocket endpoints, fans negotiation
//! messages out between them and evicts endpoints that stop answering pings.

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use rtc_relay::config::Config;
use rtc_relay::relay::RelayState;
use rtc_relay::transport;
use std::fs::OpenOptions;
use std::sync::Arc;
use tokio::signal;
use tokio::task;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let loaded = args.load_config();
    let mut config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };
    args.apply_overrides(&mut config);

    init_logging(&config)?;

    info!("rtc-relay v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!("Loaded configuration from {:?}", args.config),
        Err(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }
    if let Some(codec) = config.negotiation.preferred_codec {
        info!("Preferred video codec hint: {}", codec.as_str());
    }

    let state = Arc::new(RelayState::new(config));

    // Liveness sweeps run independently of message handling
    let monitor = state.liveness_monitor();
    info!("Liveness probe every {:?}", monitor.interval());
    let mut liveness_handle = task::spawn(monitor.run());

    let server_state = state.clone();
    let mut http_handle = task::spawn(async move {
        if let Err(e) = transport::run_http_server(server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown => {
            info!("Initiating graceful shutdown...");
        }
        result = &mut http_handle => {
            log_task_result("HTTP server", result);
        }
        result = &mut liveness_handle => {
            log_task_result("Liveness monitor", result);
        }
    }

    info!("Stopping all tasks...");
    for handle in [http_handle, liveness_handle] {
        if !handle.is_finished() {
            handle.abort();
            let _ = handle.await;
        }
    }

    info!(
        "rtc-relay stopped ({} endpoints still registered)",
        state.connection_count()
    );
    Ok(())
}

/// Filter comes from `RELAY_LOG` when set, otherwise from the configured level
fn init_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&std::env::var("RELAY_LOG").unwrap_or_else(|_| config.logging.level.clone()));

    if let Some(ref path) = config.logging.logfile {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn log_task_result(task: &str, result: Result<(), task::JoinError>) {
    match result {
        Ok(()) => warn!("{} stopped unexpectedly", task),
        Err(err) => error!("{} join error: {}", task, err),
    }
}
