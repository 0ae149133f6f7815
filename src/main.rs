//! Leaderboard observer entrypoint: loads configuration, connects to the coordination
//! service and renders a live snapshot after every change.

use std::sync::Arc;

use anyhow::Context;
use futures::{FutureExt, future::BoxFuture};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leaderboard_watch::{
    config::AppConfig,
    coord::{CoordResult, CoordinationClient},
    services::{controller::DashboardController, render::ConsoleRenderer},
    state::ObserverState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load().context("loading configuration")?;
    info!(
        endpoint = %config.endpoint,
        root = %config.root_path,
        max_size = config.max_size,
        "configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let state = ObserverState::new(config.root_path.clone());
    let renderer = Arc::new(ConsoleRenderer::new(config.output));
    let controller =
        DashboardController::new(state, config.root_path.clone(), config.max_size, renderer);

    controller
        .run(connector(config.endpoint.clone()), shutdown_rx)
        .await
        .context("leaderboard observer failed")?;

    Ok(())
}

type Connect = BoxFuture<'static, CoordResult<Arc<dyn CoordinationClient>>>;

#[cfg(feature = "zookeeper-store")]
fn connector(endpoint: String) -> impl FnMut() -> Connect + Send {
    use leaderboard_watch::coord::zookeeper;

    move || {
        let endpoint = endpoint.clone();
        async move {
            let client = zookeeper::connect(&endpoint).await?;
            Ok(Arc::new(client) as Arc<dyn CoordinationClient>)
        }
        .boxed()
    }
}

#[cfg(not(feature = "zookeeper-store"))]
fn connector(endpoint: String) -> impl FnMut() -> Connect + Send {
    use leaderboard_watch::coord::CoordError;

    move || {
        let endpoint = endpoint.clone();
        async move {
            Err(CoordError::unavailable(
                format!("no coordination backend compiled in; cannot reach {endpoint}"),
                std::io::Error::from(std::io::ErrorKind::Unsupported),
            ))
        }
        .boxed()
    }
}

/// Configure tracing on stderr so stdout carries only rendered snapshots.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
