// src/basemap.rs

//! The reference mosaic and its output tile layout.
//!
//! The basemap is a low resolution, north-up, equirectangular raster covering the
//! planet. Output tiles are cut from it on demand: a crop of the basemap, the crop
//! resampled to output resolution, and the output tile itself, which starts as a
//! copy of the resampled crop and is then mutated by the compositor.
//!
//! Layout under the tile root:
//!
//! ```text
//! main_log.txt
//! <row>_<col>/basemap_small.tif
//! <row>_<col>/basemap_large.tif
//! <row>_<col>/output.tif
//! <row>_<col>/log.txt
//! ```

use crate::config::Config;
use crate::geo::{Affine2, GeoRect, TileRect};
use crate::grid::{TileGrid, TileIndex};
use crate::run_log::RunLog;
use crate::tools::RasterTool;
use anyhow::{Context, Result};
use log::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Files belonging to one output tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePaths {
    pub dir: PathBuf,
    pub small: PathBuf,
    pub large: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
}

pub struct Basemap {
    source: PathBuf,
    tile_root: PathBuf,
    extent: GeoRect,
    width_px: u32,
    height_px: u32,
    tile_size_px: u32,
    grid: TileGrid,
    raster: Arc<dyn RasterTool>,
}

impl Basemap {
    /// Reads the basemap's size and extent and lays the tile grid over it.
    pub fn open(config: &Config, raster: Arc<dyn RasterTool>) -> Result<Self> {
        let source = config.paths.basemap.clone();
        let info = raster
            .image_info(&source)
            .with_context(|| format!("Failed to read basemap {}", source.display()))?;
        let extent = info.bounding_box.with_context(|| {
            format!("Basemap {} has no geographic extent", source.display())
        })?;
        let tile_degrees = TileGrid::tile_degrees_for(
            config.grid.meters_per_pixel,
            config.grid.tile_size_px,
            config.grid.planet_radius_m,
        );
        Ok(Self::new(
            source,
            config.paths.output_tiles.clone(),
            extent,
            (info.width, info.height),
            config.grid.tile_size_px,
            tile_degrees,
            raster,
        ))
    }

    pub fn new(
        source: PathBuf,
        tile_root: PathBuf,
        extent: GeoRect,
        (width_px, height_px): (u32, u32),
        tile_size_px: u32,
        tile_degrees: f64,
        raster: Arc<dyn RasterTool>,
    ) -> Self {
        let grid = TileGrid::covering(&extent, tile_degrees);
        info!(
            "Basemap: {} ({}x{} px, {}) -> {}x{} tiles of {:.4} deg",
            source.display(),
            width_px,
            height_px,
            extent,
            grid.rows(),
            grid.cols(),
            tile_degrees
        );
        Self {
            source,
            tile_root,
            extent,
            width_px,
            height_px,
            tile_size_px,
            grid,
            raster,
        }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn tile_size_px(&self) -> u32 {
        self.tile_size_px
    }

    pub fn tile_rect_degrees(&self, tile: TileIndex) -> TileRect {
        self.grid.rect_degrees_for(tile)
    }

    pub fn main_log(&self) -> RunLog {
        Self::main_log_at(&self.tile_root)
    }

    /// Main log of the tile tree rooted at `tile_root`.
    pub fn main_log_at(tile_root: &Path) -> RunLog {
        RunLog::at(tile_root.join("main_log.txt"))
    }

    pub fn tile_paths(&self, tile: TileIndex) -> TilePaths {
        let dir = self.tile_root.join(tile.postfix());
        TilePaths {
            small: dir.join("basemap_small.tif"),
            large: dir.join("basemap_large.tif"),
            output: dir.join("output.tif"),
            log: dir.join("log.txt"),
            dir,
        }
    }

    /// Basemap pixel coordinates to degrees.
    pub fn pixel_to_degrees(&self) -> Affine2 {
        Affine2::scale_translate(
            self.extent.width() / self.width_px as f64,
            -self.extent.height() / self.height_px as f64,
            self.extent.min_lon,
            self.extent.max_lat,
        )
    }

    /// Degrees to pixel coordinates of the given output tile.
    pub fn degrees_to_tile_pixels(&self, tile: TileIndex) -> Affine2 {
        let rect = self.tile_rect_degrees(tile);
        let px_per_degree = self.tile_size_px as f64 / self.grid.tile_degrees();
        Affine2::scale_translate(
            px_per_degree,
            -px_per_degree,
            -rect.min_lon * px_per_degree,
            rect.max_lat * px_per_degree,
        )
    }

    /// Makes sure the basemap crops and the output tile exist. Existing files are kept,
    /// in particular an output tile that already carries composited images.
    pub fn ensure_tile_images(&self, tile: TileIndex) -> Result<TilePaths> {
        let paths = self.tile_paths(tile);
        if paths.output.exists() {
            return Ok(paths);
        }
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("Failed to create tile directory {}", paths.dir.display()))?;

        debug!("Basemap: generating images for tile {}", tile);
        if !paths.small.exists() {
            self.raster
                .crop(&self.source, &self.tile_rect_degrees(tile), &paths.small)
                .with_context(|| format!("Failed to crop basemap for tile {}", tile))?;
        }
        if !paths.large.exists() {
            self.raster
                .resize(&paths.small, self.tile_size_px, self.tile_size_px, &paths.large)
                .with_context(|| format!("Failed to resample basemap for tile {}", tile))?;
        }
        crate::tools::write_atomically(&paths.output, |part| {
            fs::copy(&paths.large, part)
                .map(|_| ())
                .with_context(|| format!("Failed to seed output tile {}", tile))
        })?;
        Ok(paths)
    }
}
