// Item Catalog - Query Service
// GET /health, /data, /stats over the items table

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use item_catalog::{logging, open_database, router, Config};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing()?;

    let config = Config::from_env()?;

    // Schema must exist before the read-only request connections touch it
    drop(open_database(&config.database_path)?);
    info!("Database ready: {}", config.database_path.display());

    let addr = config.bind_addr;
    let app = router(config);

    let listener = TcpListener::bind(addr).await?;
    info!("Query service listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => warn!("Received Ctrl+C, shutting down..."),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await
        }
    }
}
