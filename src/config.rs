// Configuration - read once from the environment
// The loader and the query service both take a Config by value, so tests can
// point one at a scratch database without touching env vars.
//
// Environment variables:
//   ITEMS_DATABASE_PATH   SQLite file (default: items.db)
//   ITEMS_SOURCE_PATH     CSV file read by the loader (default: data/items.csv)
//   ITEMS_BIND_ADDR       Query service listen address (default: 0.0.0.0:8000)

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DATABASE_PATH_VAR: &str = "ITEMS_DATABASE_PATH";
pub const SOURCE_PATH_VAR: &str = "ITEMS_SOURCE_PATH";
pub const BIND_ADDR_VAR: &str = "ITEMS_BIND_ADDR";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub source_path: PathBuf,
    pub bind_addr: SocketAddr,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("items.db")
}

fn default_source_path() -> PathBuf {
    PathBuf::from("data/items.csv")
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

impl Config {
    /// Config for the given database file, everything else defaulted
    pub fn new(database_path: impl AsRef<Path>) -> Self {
        Self {
            database_path: database_path.as_ref().to_path_buf(),
            source_path: default_source_path(),
            bind_addr: default_bind_addr(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get(BIND_ADDR_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid {}: {:?}", BIND_ADDR_VAR, raw))?,
            None => default_bind_addr(),
        };

        Ok(Self {
            database_path: get(DATABASE_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
            source_path: get(SOURCE_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(default_source_path),
            bind_addr,
        })
    }

    pub fn with_source_path(mut self, source_path: impl AsRef<Path>) -> Self {
        self.source_path = source_path.as_ref().to_path_buf();
        self
    }
}
