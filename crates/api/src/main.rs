use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use precinct_infra::{AuthConfig, SessionSweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    precinct_observability::init();

    let config = AuthConfig::from_env().context("invalid configuration")?;
    tracing::info!(?config, "configuration loaded");

    let services = Arc::new(
        precinct_api::app::build_services(&config)
            .await
            .context("failed to wire services")?,
    );
    let sweeper = SessionSweeper::spawn(services.sessions.clone(), config.sweep_interval);

    let app = precinct_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    Ok(())
}
