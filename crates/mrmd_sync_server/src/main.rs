use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mrmd_core::storage::FsStore;
use mrmd_sync_server::config::Config;
use mrmd_sync_server::hooks::AllowAll;
use mrmd_sync_server::lock::InstanceLock;
use mrmd_sync_server::server::create_server;

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let default_filter = format!(
        "mrmd_sync_server={level},mrmd_core={level},tower_http=warn",
        level = config.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mrmd-sync server v{}", env!("CARGO_PKG_VERSION"));
    info!("Base directory: {:?}", config.dir);

    // Refuse dangerous base directories unless the operator opted in
    if let Err(e) = config.check_base_dir() {
        error!("{}", e);
        std::process::exit(1);
    }

    // Open storage (also garbage-collects stale temp files) and start the
    // external-change watcher
    let store = match FsStore::open(&config.dir, config.extensions.clone(), config.max_file_size) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open base directory {:?}: {}", config.dir, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = store.watch() {
        error!("Failed to start filesystem watcher: {}", e);
        std::process::exit(1);
    }

    // One process per base directory
    let instance_lock = match InstanceLock::acquire(store.state_dir(), config.port) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let server = create_server(config.clone(), store, Arc::new(AllowAll));

    // Bind and serve
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Server listening on http://{}", addr);

    // Flushing the hub inside the shutdown future closes every socket, which
    // lets the graceful drain below complete.
    let hub = server.hub.clone();
    let result = axum::serve(listener, server.router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            hub.shutdown().await;
        })
        .await;
    if let Err(e) = result {
        error!("Server error: {}", e);
    }

    instance_lock.release();
    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
