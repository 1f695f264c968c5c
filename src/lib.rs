// Item Catalog - Core Library
// CSV loader + read-only query service sharing one SQLite table

pub mod config;
pub mod db;
pub mod etl;
pub mod logging;

// Query service (axum) - only with the server feature
#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod error;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    Item, LoadRun, PriceStats, RunStatus,
    count_items, fetch_page, last_load_run, open_database, open_for_query, price_stats,
    setup_database,
};
pub use etl::{run_load, LoadReport, Loader};

#[cfg(feature = "server")]
pub use api::{router, AppState};
#[cfg(feature = "server")]
pub use error::{ApiError, ApiResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
