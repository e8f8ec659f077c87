use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vantage_core::Config;
use vantage_crypto::SessionCipher;
use vantage_docker::DockerDriver;
use vantage_orchestrator::OrchestratorBuilder;
use vantage_pool::PoolManager;
use vantage_server::{AppState, api_routes};
use vantage_session::{AuthStore, CredentialStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    let cipher = Arc::new(SessionCipher::from_config(&config).await?);

    let driver = Arc::new(DockerDriver::connect(
        &config.docker_socket,
        config.devtools_port,
        config.control_port,
    )?);
    let pool = Arc::new(PoolManager::new(driver, config.clone()));

    // Stale browsers from a previous instance go first, then the warm pool
    // fills before the listener opens.
    let orphans = pool.cleanup_orphans().await?;
    tracing::info!(orphans, "startup container cleanup finished");
    pool.run_maintenance().await;

    let credentials = Arc::new(CredentialStore::new(cipher.clone(), config.session_timeout));
    let auths = Arc::new(AuthStore::new(config.auth_timeout));

    pool.spawn_maintenance();
    pool.spawn_released_sweeper();
    credentials.spawn_sweeper(config.session_sweep_tick);
    auths.spawn_sweeper(config.session_sweep_tick);

    let orchestrator = OrchestratorBuilder::new(
        config.clone(),
        pool.clone(),
        credentials,
        auths,
        cipher,
    )
    .build();

    let state = AppState::new(orchestrator);
    let app = api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    tracing::info!(addr = %addr, pool_min = config.pool_min_size, "vantage server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, destroying all containers");
    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("ctrl-c handler");
}
