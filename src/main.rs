//! Server entry point.
//!
//! Reads `ringodis.conf` from the working directory (no command-line
//! arguments), picks standalone or cluster mode from it, and serves until a
//! termination signal arrives, then drains connections and shuts down.

use ringodis::config::{Properties, CONFIG_FILE};
use ringodis::connection::Handler;
use ringodis::db::{Server, StorageEngine};
use ringodis::Cluster;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let props = Properties::load(CONFIG_FILE)?;

    let engine: Arc<dyn StorageEngine> = if props.cluster_enabled() {
        Arc::new(Cluster::new(&props)?)
    } else {
        Arc::new(Server::new(props.databases))
    };
    let handler = Handler::new(engine);

    let listener = TcpListener::bind(props.listen_addr()).await?;
    info!(addr = %props.listen_addr(), version = ringodis::VERSION, "listening");

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&handler)) => {}
        result = shutdown_signal() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(err) => error!(error = %err, "signal handler failed"),
            }
        }
    }

    handler.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: Arc<Handler>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(Arc::clone(&handler).handle(stream));
            }
            Err(err) => {
                error!(error = %err, "accept failed");
            }
        }
    }
}

/// Resolves on SIGINT, SIGTERM, SIGHUP or SIGQUIT.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
        _ = sigquit.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
