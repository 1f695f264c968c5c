// Loader - CSV → items table
// Streams the source record by record; every run commits once or not at all.

use crate::config::Config;
use crate::db::{self, LoadRun, RunStatus};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use tracing::{info, warn};

/// Columns the source header must name. Anything else is ignored.
pub const REQUIRED_COLUMNS: [&str; 2] = ["name", "price"];

/// Source row as it appears in the CSV
#[derive(Debug, Deserialize)]
struct SourceRecord {
    name: String,
    price: f64,
}

/// Outcome of one load
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Data records scanned (header excluded)
    pub rows_read: usize,

    /// Rows newly written to `items`
    pub inserted: usize,

    /// Rows whose name already existed
    pub skipped: usize,
}

pub struct Loader {
    config: Config,
}

impl Loader {
    pub fn new(config: Config) -> Self {
        Loader { config }
    }

    /// Load the configured source into the configured database
    pub fn run(&self) -> Result<LoadReport> {
        let source_path = &self.config.source_path;
        let source = File::open(source_path)
            .with_context(|| format!("Failed to open source file {}", source_path.display()))?;

        let mut conn = db::open_database(&self.config.database_path)?;

        info!(
            source = %source_path.display(),
            database = %self.config.database_path.display(),
            "starting load"
        );
        run_load(&mut conn, source)
    }
}

/// Upsert every record of `source` into `items`.
///
/// On success the inserts and a `success` run record are committed together.
/// On any failure nothing from the scan is kept and a `failed` run record is
/// written on its own.
pub fn run_load<R: Read>(conn: &mut Connection, source: R) -> Result<LoadReport> {
    let started_at = Utc::now();

    match load_in_transaction(conn, source, started_at) {
        Ok(report) => {
            info!(
                rows_read = report.rows_read,
                inserted = report.inserted,
                skipped = report.skipped,
                "load completed"
            );
            Ok(report)
        }
        Err(err) => {
            let failed = LoadRun {
                started_at,
                finished_at: Utc::now(),
                status: RunStatus::Failed,
                inserted: 0,
                error: Some(format!("{:#}", err)),
            };
            if let Err(log_err) = db::record_load_run(conn, &failed) {
                warn!("could not record failed load run: {:#}", log_err);
            }
            Err(err)
        }
    }
}

fn load_in_transaction<R: Read>(
    conn: &mut Connection,
    source: R,
    started_at: DateTime<Utc>,
) -> Result<LoadReport> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = rdr
        .headers()
        .context("Failed to read source header row")?
        .clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            bail!("Source is missing required column '{}'", column);
        }
    }

    // Dropping `tx` on an early return rolls everything back
    let tx = conn
        .transaction()
        .context("Failed to begin load transaction")?;

    let mut report = LoadReport::default();
    let mut record = csv::StringRecord::new();

    while rdr
        .read_record(&mut record)
        .context("Failed to read source record")?
    {
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let row: SourceRecord = record
            .deserialize(Some(&headers))
            .with_context(|| format!("Malformed record at line {}", line))?;

        if row.name.is_empty() {
            bail!("Malformed record at line {}: empty name", line);
        }
        if !row.price.is_finite() {
            bail!("Malformed record at line {}: price is not a number", line);
        }

        report.rows_read += 1;

        let inserted = db::insert_item_if_absent(&tx, &row.name, row.price)
            .with_context(|| format!("Failed to insert record at line {}", line))?;
        if inserted {
            report.inserted += 1;
        } else {
            report.skipped += 1;
        }
    }

    db::record_load_run(
        &tx,
        &LoadRun {
            started_at,
            finished_at: Utc::now(),
            status: RunStatus::Success,
            inserted: report.inserted as i64,
            error: None,
        },
    )?;

    tx.commit().context("Failed to commit load")?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_idempotency_load_twice() {
        let mut conn = memory_db();
        let source = "name,price\nlamp,19.99\nchair,45.00\ndesk,120.50\n";

        let first = run_load(&mut conn, source.as_bytes()).unwrap();
        let second = run_load(&mut conn, source.as_bytes()).unwrap();

        assert_eq!(first.inserted, 3, "first load inserts every row");
        assert_eq!(second.inserted, 0, "second load inserts nothing");
        assert_eq!(second.skipped, 3);
        assert_eq!(db::count_items(&conn).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let mut conn = memory_db();
        let source = "name,price\nlamp,10\nlamp,99\n";

        let report = run_load(&mut conn, source.as_bytes()).unwrap();

        assert_eq!(
            report,
            LoadReport {
                rows_read: 2,
                inserted: 1,
                skipped: 1,
            }
        );
        let items = db::fetch_page(&conn, 10, 0).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].price, 10.0);
    }

    #[test]
    fn test_extra_columns_and_whitespace() {
        let mut conn = memory_db();
        let source = "sku, price ,name,notes\nA1, 5.25 , bolt ,zinc\n";

        run_load(&mut conn, source.as_bytes()).unwrap();

        let items = db::fetch_page(&conn, 10, 0).unwrap();
        assert_eq!(items[0].name, "bolt");
        assert_eq!(items[0].price, 5.25);
    }

    #[test]
    fn test_missing_column_fails() {
        let mut conn = memory_db();

        let err = run_load(&mut conn, "name,cost\nlamp,1\n".as_bytes()).unwrap_err();

        assert!(err.to_string().contains("'price'"));
        assert_eq!(db::count_items(&conn).unwrap(), 0);
    }

    #[test]
    fn test_malformed_record_rolls_back_whole_run() {
        let mut conn = memory_db();
        let source = "name,price\nlamp,10\nchair,20\ndesk,not-a-price\n";

        let err = run_load(&mut conn, source.as_bytes()).unwrap_err();

        assert!(format!("{:#}", err).contains("line 4"));
        assert_eq!(db::count_items(&conn).unwrap(), 0, "no partial commit");

        let run = db::last_load_run(&conn).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("line 4"));
    }

    #[test]
    fn test_empty_name_is_malformed() {
        let mut conn = memory_db();

        let err = run_load(&mut conn, "name,price\n,3\n".as_bytes()).unwrap_err();

        assert!(err.to_string().contains("empty name"));
    }

    #[test]
    fn test_short_record_is_malformed() {
        let mut conn = memory_db();

        assert!(run_load(&mut conn, "name,price\nlamp,1\nchair\n".as_bytes()).is_err());
        assert_eq!(db::count_items(&conn).unwrap(), 0);
    }

    #[test]
    fn test_successful_run_is_recorded() {
        let mut conn = memory_db();

        run_load(&mut conn, "name,price\nlamp,1\n".as_bytes()).unwrap();

        let run = db::last_load_run(&conn).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.inserted, 1);
        assert!(run.finished_at >= run.started_at);
    }

    #[test]
    fn test_loader_runs_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("items.csv");
        std::fs::write(&source_path, "name,price\nlamp,1\nchair,2\n").unwrap();

        let config = Config::new(dir.path().join("data").join("catalog.db"))
            .with_source_path(&source_path);
        let loader = Loader::new(config);

        assert_eq!(loader.run().unwrap().inserted, 2);
        assert_eq!(loader.run().unwrap().inserted, 0);
    }

    #[test]
    fn test_loader_unavailable_storage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("items.csv");
        std::fs::write(&source_path, "name,price\nlamp,1\n").unwrap();

        // A regular file where the database directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let config = Config::new(blocker.join("catalog.db")).with_source_path(&source_path);

        let err = Loader::new(config).run().unwrap_err();
        assert!(format!("{:#}", err).contains("blocker"));
    }

    #[test]
    fn test_loader_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("catalog.db"))
            .with_source_path(dir.path().join("absent.csv"));

        let err = Loader::new(config).run().unwrap_err();
        assert!(err.to_string().contains("absent.csv"));
    }
}
