//! # WebSocket Broadcast Relay Server
//!
//! Accepts WebSocket connections on one port and forwards every message a
//! client sends to all other connected clients. Next to the relay it runs one
//! auxiliary worker process (by default `python bot.py`) whose output is
//! copied into the relay's log.
//!
//! ## Functionality:
//! - **Relay**: `/` and `/ws` upgrade to WebSocket; text and binary frames are
//!   passed through unchanged to every other peer.
//! - **Operator endpoints**: `/health` and `/status`.
//! - **Worker**: launched at startup, terminated on shutdown. A worker that
//!   cannot be started is logged and the relay keeps running.
//! - **Graceful Shutdown**: `tokio-graceful` stops the listener, closes every
//!   peer and then stops the worker, within a bounded time.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_graceful::{Shutdown, ShutdownGuard};

use lib_relay::{launch_or_report, serve, LifecycleCoordinator, WorkerProcess};

mod relay_logic;
use relay_logic::config::{self, RelayConfig};
use relay_logic::logger;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (config, config_file) = config::load_config();
    let log_path = logger::setup_logging(&config.log_dir, &config.log_level)
        .context("Failed to initialize logging")?;
    log::info!("Logging to {}", log_path.display());
    config_file.log();
    log::info!("{:?}", config);

    // Bind before anything else runs so a taken port fails the process.
    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    let worker = match &config.worker {
        Some(spec) => launch_or_report(spec),
        None => {
            log::info!("Worker disabled by configuration.");
            None
        }
    };

    let shutdown = Shutdown::default();
    let shutdown_limit = config.shutdown_limit;
    shutdown.spawn_task_fn(move |guard| tokio_main(guard, listener, config, worker));

    match shutdown.shutdown_with_limit(shutdown_limit).await {
        Ok(elapsed) => {
            log::info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            log::warn!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    log::info!("Bye!");
    Ok(())
}

async fn tokio_main(
    guard: ShutdownGuard,
    listener: TcpListener,
    config: RelayConfig,
    worker: Option<WorkerProcess>,
) {
    let coordinator = Arc::new(LifecycleCoordinator::default());

    let signal = guard.clone();
    let stopped = async move {
        signal.cancelled().await;
        log::info!("Signal received: initiate graceful shutdown");
    };

    if let Err(e) = serve(listener, coordinator, config.transport, stopped).await {
        log::error!("Relay server failed: {}", e);
    }

    if let Some(worker) = worker {
        if let Err(e) = worker.terminate(config.worker_grace).await {
            log::error!("Failed to stop worker: {}", e);
        }
    }

    drop(guard);
}
