use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use facegate_backend::db::store::IdentityStore;
use facegate_backend::pipeline::engine::VerificationEngine;
use facegate_backend::pipeline::face;
use facegate_backend::stats::Stats;
use facegate_backend::utils::config::Config;
use facegate_backend::utils::logging;
use facegate_backend::AppState;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    std::fs::create_dir_all(&cfg.data)?;

    let db_path = cfg.db_path();
    let store = IdentityStore::open(&db_path, cfg.db_pool_size)
        .with_context(|| format!("opening identity store at {}", db_path.display()))?;
    info!("Identity store ready at {}", db_path.display());

    // Model download uses blocking reqwest, keep it off the runtime threads.
    let model_settings = cfg.model.clone();
    let extractor = tokio::task::spawn_blocking(move || face::shared_processor(&model_settings))
        .await?
        .map_err(|e| {
            error!("Face model initialization failed: {}", e);
            anyhow::anyhow!(e)
        })?;
    info!("Embedding extractor '{}' loaded", extractor.name());

    let engine = VerificationEngine::new(extractor, store, Arc::new(Stats::new()))
        .with_threshold(cfg.match_threshold)
        .with_extract_timeout(cfg.extract_timeout);
    let state = Arc::new(AppState::new(engine));

    let app = facegate_backend::api::routes::router(state);
    let ip = cfg.host.parse::<std::net::IpAddr>()
        .with_context(|| format!("invalid FACEGATE_HOST '{}'", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr, threshold = cfg.match_threshold);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
