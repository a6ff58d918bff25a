// src/catalog.rs

//! Read side of the data set catalog.
//!
//! The crawler that discovers remote HRSC products stores one row per remote file
//! in a SQLite database. The mosaic run only reads it: once at startup for the
//! ordered list of set names, and from the fetch stage for the files of one set.

use anyhow::{Context, Result};
use log::*;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Subtype of the elevation products filed next to the images.
pub const DEM_SUBTYPE: &str = "DEM";

/// One remote file belonging to a data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetRecord {
    pub set_name: String,
    /// Channel code, e.g. `nd3` or `re3`.
    pub subtype: String,
    pub source_url: String,
    /// Filled in once the file has been fetched: converted raster first, raw download second.
    pub local_paths: Vec<PathBuf>,
}

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Opens (creating if needed) the catalog database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog {}", path.display()))?;
        let catalog = Catalog { conn };
        catalog.init_schema()?;
        debug!("Catalog: opened {}", path.display());
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self> {
        let catalog = Catalog {
            conn: Connection::open_in_memory()?,
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS data_sets (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    sensor      TEXT NOT NULL,
                    subtype     TEXT NOT NULL,
                    set_name    TEXT NOT NULL,
                    url         TEXT NOT NULL,
                    UNIQUE(set_name, subtype)
                )",
                [],
            )
            .context("Failed to create data_sets table")?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_data_sets_sensor ON data_sets(sensor, set_name)",
            [],
        )?;
        Ok(())
    }

    /// Inserts or replaces the record for `(set_name, subtype)`.
    pub fn add_record(&self, sensor: &str, subtype: &str, set_name: &str, url: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO data_sets (sensor, subtype, set_name, url)
                 VALUES (?1, ?2, ?3, ?4)",
                params![sensor, subtype, set_name, url],
            )
            .with_context(|| format!("Failed to add catalog record {}/{}", set_name, subtype))?;
        Ok(())
    }

    /// Distinct image set names for a sensor, in name order. Elevation products are excluded.
    pub fn list_set_names(&self, sensor: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT set_name FROM data_sets
             WHERE sensor = ?1 AND subtype != ?2
             ORDER BY set_name",
        )?;
        let names = stmt
            .query_map(params![sensor, DEM_SUBTYPE], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list catalog set names")?;
        Ok(names)
    }

    /// Image files of one set, ordered by subtype.
    pub fn records_for(&self, set_name: &str) -> Result<Vec<DataSetRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT set_name, subtype, url FROM data_sets
             WHERE set_name = ?1 AND subtype != ?2
             ORDER BY subtype",
        )?;
        let records = stmt
            .query_map(params![set_name, DEM_SUBTYPE], |row| {
                Ok(DataSetRecord {
                    set_name: row.get(0)?,
                    subtype: row.get(1)?,
                    source_url: row.get(2)?,
                    local_paths: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read catalog records for {}", set_name))?;
        Ok(records)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("path", &self.conn.path())
            .finish()
    }
}
