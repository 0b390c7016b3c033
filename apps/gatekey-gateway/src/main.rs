mod bootstrap;
mod cli;
mod health_checker;
mod routes;
mod state;

use axum::Router;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let boot = bootstrap::bootstrap_from_env().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let release_loop = boot
        .state
        .scheduler
        .clone()
        .spawn_release_loop(boot.health_checker.clone(), shutdown_rx.clone());
    let watchdog = boot.state.scheduler.clone().spawn_use_timeout_watchdog(shutdown_rx);

    let app = Router::new()
        .merge(routes::chat::router())
        .nest("/admin", routes::admin::router(boot.state.clone()))
        .with_state(boot.state);

    let bind = format!("{}:{}", boot.host, boot.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gatekey-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = release_loop.await;
    let _ = watchdog.await;
    Ok(())
}
