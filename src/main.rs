use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dns;
mod engine;
mod error;
mod features;
mod layout;
mod lookup;
mod model;
mod rdap;
mod routes;
mod storage;
mod types;

use config::Config;
use engine::PhishingEngine;
use routes::AppState;
use storage::{FeedbackStore, FileBlocklist, MemoryFeedbackStore, RedisFeedbackStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netra_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    let engine = PhishingEngine::from_config(&config).await?;

    let feedback: Arc<dyn FeedbackStore> = match &config.storage.redis_url {
        Some(url) => Arc::new(RedisFeedbackStore::connect(url, &config.storage.feedback_key_prefix).await?),
        None => {
            warn!("No Redis URL configured, feedback is kept in memory only");
            Arc::new(MemoryFeedbackStore::new())
        }
    };

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        engine: Arc::new(engine),
        blocklist: Arc::new(FileBlocklist::new(&config.storage.blocklist_path)),
        feedback,
        prometheus: Some(prometheus),
    };
    let app = routes::router(state, config.server.max_concurrent_requests);

    let addr = config.bind_addr();
    info!("Starting Netra phishing detection service on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    warn!("Shutdown signal received, starting graceful shutdown");
}
