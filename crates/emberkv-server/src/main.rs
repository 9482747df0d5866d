//! emberkvd — a small in-memory, RESP-speaking key-value daemon.

mod connection;
mod dispatch;
mod event_loop;

use anyhow::{Context, Result};
use emberkv_core::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use dispatch::Dispatcher;
use event_loop::EventLoop;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = ServerConfig::load().context("loading configuration")?;

    // A bare positional port argument overrides the config/env-resolved
    // one, for quick manual runs: `emberkvd 7000`.
    if let Some(port) = std::env::args().nth(1) {
        config.network.port = port
            .parse()
            .with_context(|| format!("'{port}' is not a valid port number"))?;
    }

    let keyspace = match emberkv_snapshot::load(&config.snapshot.path) {
        Ok(keyspace) => {
            tracing::info!(path = %config.snapshot.path.display(), "loaded snapshot");
            keyspace
        }
        Err(e) => {
            tracing::info!(path = %config.snapshot.path.display(), error = %e, "starting with an empty keyspace");
            emberkv_core::Keyspace::new()
        }
    };

    let bind_addr = format!("{}:{}", config.network.bind_address, config.network.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "emberkvd listening");

    let dispatcher = Dispatcher::new(config.snapshot.path.clone());
    let mut event_loop = EventLoop::new(listener, keyspace, dispatcher);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    event_loop.run(shutdown_rx).await;

    if let Err(e) = emberkv_snapshot::save(&config.snapshot.path, event_loop.keyspace()) {
        tracing::error!(error = %e, "failed to save snapshot on shutdown");
    } else {
        tracing::info!(path = %config.snapshot.path.display(), "snapshot saved, exiting");
    }

    Ok(())
}

/// Waits for SIGINT or SIGTERM and fires the shutdown broadcast.
async fn wait_for_shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }

    let _ = shutdown_tx.send(());
}
