// src/config.rs

//! Configuration for a mosaic run.
//!
//! Everything the pipeline needs (paths, grid resolution, pool sizes, external
//! program names) lives in one `Config` value that is loaded once and handed to
//! the components that need it. Every section has defaults, so a config file
//! only has to name the fields it changes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Input, cache and output locations.
    pub paths: PathsConfig,
    /// Output grid geometry.
    pub grid: GridConfig,
    /// Worker pool sizes.
    pub concurrency: ConcurrencyConfig,
    /// External programs.
    pub tools: ToolsConfig,
    /// Catalog query settings.
    pub catalog: CatalogConfig,
}

impl Config {
    /// Loads a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let grid = &self.grid;
        if !(grid.meters_per_pixel.is_finite() && grid.meters_per_pixel > 0.0) {
            bail!("grid.meters_per_pixel must be positive");
        }
        if !(grid.planet_radius_m.is_finite() && grid.planet_radius_m > 0.0) {
            bail!("grid.planet_radius_m must be positive");
        }
        if grid.tile_size_px == 0 || grid.piece_size_px == 0 {
            bail!("grid.tile_size_px and grid.piece_size_px must be non-zero");
        }
        if self.concurrency.download_threads == 0 || self.concurrency.process_threads == 0 {
            bail!("concurrency thread counts must be non-zero");
        }
        Ok(())
    }
}

// --- Paths ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Low resolution reference mosaic.
    pub basemap: PathBuf,
    /// SQLite catalog written by the crawler.
    pub catalog_db: PathBuf,
    /// One directory per data set holding the downloaded and converted files.
    pub download_cache: PathBuf,
    /// One directory per data set holding registration output and pieces.
    pub processed_dir: PathBuf,
    /// Output tiles, tile logs and the main log.
    pub output_tiles: PathBuf,
    /// When set, log output goes to a timestamped file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            basemap: PathBuf::from("projection_space_basemap.tif"),
            catalog_db: PathBuf::from("planetary.db"),
            download_cache: PathBuf::from("hrscDownloadCache"),
            processed_dir: PathBuf::from("hrscProcessedFiles"),
            output_tiles: PathBuf::from("outputTiles"),
            log_dir: None,
        }
    }
}

// --- Grid ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Ground resolution of the output tiles.
    pub meters_per_pixel: f64,
    /// Output tiles are square, this many pixels on a side.
    pub tile_size_px: u32,
    /// Input images are cut into square pieces of this many pixels.
    pub piece_size_px: u32,
    /// Sphere radius used to convert meters to degrees (Mars by default).
    pub planet_radius_m: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            meters_per_pixel: 100.0,
            tile_size_px: 512,
            piece_size_px: 2048,
            planet_radius_m: 3_396_190.0,
        }
    }
}

// --- Concurrency ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Parallel downloads within one data set (five files per set).
    pub download_threads: usize,
    /// Tile compositing workers.
    pub process_threads: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        ConcurrencyConfig {
            download_threads: 5,
            process_threads: 6,
        }
    }
}

// --- External tools ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub wget: PathBuf,
    pub gdal_translate: PathBuf,
    pub gdalinfo: PathBuf,
    /// `register <basemap> <image> <transform out>`
    pub register: PathBuf,
    /// `color <basemap> <red> <green> <blue> <nir> <nadir> <transform> <color out> <mask out>`
    pub color_transform: PathBuf,
    /// `compositor <target tile> <source tile> <color> <mask> <transform>`
    pub compositor: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            wget: PathBuf::from("wget"),
            gdal_translate: PathBuf::from("gdal_translate"),
            gdalinfo: PathBuf::from("gdalinfo"),
            register: PathBuf::from("./RegisterHrsc"),
            color_transform: PathBuf::from("./transformHrscImageColor"),
            compositor: PathBuf::from("./hrscMosaic"),
        }
    }
}

// --- Catalog ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Sensor code the crawler files HRSC records under.
    pub sensor: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            sensor: "hrsc".to_string(),
        }
    }
}
