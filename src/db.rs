use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One catalog row. `name` is the de-duplication key.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

/// Aggregates over a price-filtered slice of `items`.
/// All of average/min/max are None when no row matched.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PriceStats {
    pub total_items: i64,
    pub average_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Audit record for one loader invocation
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoadRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub inserted: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Items Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price REAL NOT NULL
        )",
        [],
    )?;

    // Backs the loader's ON CONFLICT(name) upsert
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_name ON items(name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_price ON items(price)",
        [],
    )?;

    // ==========================================================================
    // Load Runs (one row per loader invocation)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS etl_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            status TEXT NOT NULL,
            inserted INTEGER NOT NULL,
            error TEXT
        )",
        [],
    )?;

    Ok(())
}

/// Open (creating if needed) the database read-write and ensure the schema
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn).context("Failed to set up database schema")?;

    Ok(conn)
}

/// Open an existing database for one request.
///
/// Never creates the file; a missing database is a storage error.
/// `query_only` rejects any write issued through this connection.
pub fn open_for_query(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open database {}", path.display()))?;

    conn.pragma_update(None, "query_only", true)?;
    Ok(conn)
}

/// Cheap connectivity probe
pub fn ping(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

/// Insert unless an item with this name already exists.
/// Returns true when a row was written.
pub fn insert_item_if_absent(conn: &Connection, name: &str, price: f64) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO items (name, price) VALUES (?1, ?2)
         ON CONFLICT(name) DO NOTHING",
    )?;
    let changed = stmt.execute(params![name, price])?;

    Ok(changed > 0)
}

pub fn count_items(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;

    Ok(count)
}

/// One page of items in ascending id order
pub fn fetch_page(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, price
         FROM items
         ORDER BY id
         LIMIT ?1 OFFSET ?2",
    )?;

    let items = stmt
        .query_map(params![limit, offset], |row| {
            Ok(Item {
                id: row.get(0)?,
                name: row.get(1)?,
                price: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Count/avg/min/max over items with min_price <= price <= max_price.
/// A missing bound leaves that side open.
pub fn price_stats(
    conn: &Connection,
    min_price: Option<f64>,
    max_price: Option<f64>,
) -> Result<PriceStats> {
    let stats = conn.query_row(
        "SELECT COUNT(*), AVG(price), MIN(price), MAX(price)
         FROM items
         WHERE (?1 IS NULL OR price >= ?1)
           AND (?2 IS NULL OR price <= ?2)",
        params![min_price, max_price],
        |row| {
            Ok(PriceStats {
                total_items: row.get(0)?,
                average_price: row.get(1)?,
                min_price: row.get(2)?,
                max_price: row.get(3)?,
            })
        },
    )?;

    Ok(stats)
}

pub fn record_load_run(conn: &Connection, run: &LoadRun) -> Result<()> {
    conn.execute(
        "INSERT INTO etl_runs (started_at, finished_at, status, inserted, error)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.status.as_str(),
            run.inserted,
            run.error,
        ],
    )?;

    Ok(())
}

pub fn last_load_run(conn: &Connection) -> Result<Option<LoadRun>> {
    let run = conn
        .query_row(
            "SELECT started_at, finished_at, status, inserted, error
             FROM etl_runs
             ORDER BY id DESC
             LIMIT 1",
            [],
            |row| {
                let status: String = row.get(2)?;
                Ok(LoadRun {
                    started_at: timestamp_column(row, 0)?,
                    finished_at: timestamp_column(row, 1)?,
                    status: RunStatus::parse(&status).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            Type::Text,
                            format!("unknown run status {:?}", status).into(),
                        )
                    })?,
                    inserted: row.get(3)?,
                    error: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(run)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
