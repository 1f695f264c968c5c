use anyhow::Result;
use std::env;

use item_catalog::{logging, Config, Loader};

fn main() -> Result<()> {
    logging::init_tracing()?;

    let mut config = Config::from_env()?;

    // Optional positional argument overrides ITEMS_SOURCE_PATH
    if let Some(source) = env::args().nth(1) {
        config = config.with_source_path(source);
    }

    run_import(config)
}

fn run_import(config: Config) -> Result<()> {
    println!("🗄️  Item Catalog: CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Source:   {}", config.source_path.display());
    println!("  Database: {}", config.database_path.display());

    let report = Loader::new(config).run()?;

    println!("\n✓ Records read: {}", report.rows_read);
    println!("✓ Inserted: {} new records", report.inserted);
    println!("✓ Skipped existing names: {}", report.skipped);

    Ok(())
}
