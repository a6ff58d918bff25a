// tests/support/mod.rs

//! Fake external tools for end-to-end runs.
//!
//! The fakes agree on a small world: a global 3600x1800 basemap (10 px per
//! degree) and a `Scene` that says, per data set, where its nadir image sits in
//! basemap pixels. Everything that would normally be a raster is a small text
//! file, and the compositor appends the set name to the output tile.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use hrsc_mosaic::basemap::Basemap;
use hrsc_mosaic::catalog::Catalog;
use hrsc_mosaic::config::Config;
use hrsc_mosaic::geo::{Affine2, GeoRect, PixelWindow};
use hrsc_mosaic::grid::TileIndex;
use hrsc_mosaic::planner::TileWorkUnit;
use hrsc_mosaic::tools::{
    CancelToken, CompletionToken, Compositor, Downloader, ImageInfo, ImageProcessor, PrepJob,
    RasterTool,
};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const CHANNELS: [&str; 5] = ["nd3", "re3", "gr3", "bl3", "ir3"];

/// Placement of one data set: top-left basemap pixel and pixel size.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub basemap_x: f64,
    pub basemap_y: f64,
    pub width_px: u32,
    pub height_px: u32,
}

impl Placement {
    pub fn footprint(&self) -> GeoRect {
        GeoRect::new(
            -180.0 + self.basemap_x / 10.0,
            -180.0 + (self.basemap_x + self.width_px as f64) / 10.0,
            90.0 - (self.basemap_y + self.height_px as f64) / 10.0,
            90.0 - self.basemap_y / 10.0,
        )
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    placements: HashMap<String, Placement>,
}

impl Scene {
    pub fn place(&mut self, set_name: &str, placement: Placement) {
        self.placements.insert(set_name.to_string(), placement);
    }

    /// Data sets live in directories named after them.
    fn lookup(&self, path: &Path) -> Result<Placement> {
        let set_name = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .context("path has no data set directory")?;
        self.placements
            .get(set_name)
            .copied()
            .with_context(|| format!("unknown data set {}", set_name))
    }
}

#[derive(Default)]
pub struct FakeDownloader {
    pub downloads: AtomicUsize,
}

impl Downloader for FakeDownloader {
    fn download(&self, url: &str, dest: &Path, _: &CancelToken) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        fs::write(dest, url)?;
        Ok(())
    }
}

pub struct FakeRaster {
    pub scene: Arc<Scene>,
}

impl RasterTool for FakeRaster {
    fn convert(&self, src: &Path, dst: &Path, _: &CancelToken) -> Result<()> {
        fs::copy(src, dst)?;
        Ok(())
    }

    fn image_info(&self, path: &Path) -> Result<ImageInfo> {
        if path.file_name().map_or(false, |n| n == "base.tif") {
            return Ok(ImageInfo {
                width: 3600,
                height: 1800,
                bounding_box: Some(GeoRect::new(-180.0, 180.0, -90.0, 90.0)),
                creation_time: None,
            });
        }
        let placement = self.scene.lookup(path)?;
        Ok(ImageInfo {
            width: placement.width_px,
            height: placement.height_px,
            bounding_box: Some(placement.footprint()),
            creation_time: Some(Utc.with_ymd_and_hms(2004, 1, 23, 10, 23, 45).unwrap()),
        })
    }

    fn crop(&self, _: &Path, rect: &GeoRect, dst: &Path) -> Result<()> {
        fs::write(dst, format!("crop {}\n", rect))?;
        Ok(())
    }

    fn resize(&self, src: &Path, _: u32, _: u32, dst: &Path) -> Result<()> {
        fs::copy(src, dst)?;
        Ok(())
    }

    fn extract_window(&self, src: &Path, window: &PixelWindow, dst: &Path, _: &CancelToken) -> Result<()> {
        fs::write(dst, format!("{} {:?}\n", src.display(), window))?;
        Ok(())
    }
}

pub struct FakeProcessor {
    pub scene: Arc<Scene>,
}

impl ImageProcessor for FakeProcessor {
    fn prepare(&self, job: &PrepJob, _: &CancelToken) -> Result<()> {
        let placement = self.scene.lookup(&job.nadir)?;
        Affine2::translation(placement.basemap_x, placement.basemap_y).write_to(&job.transform_out)?;
        fs::write(&job.color_out, b"color")?;
        fs::write(&job.mask_out, b"mask")?;
        Ok(())
    }
}

/// Appends the set name to the output tile; fails on listed tiles.
#[derive(Default)]
pub struct FakeCompositor {
    pub applied: Mutex<Vec<(String, TileIndex)>>,
    pub failing: Mutex<Vec<TileIndex>>,
}

impl FakeCompositor {
    pub fn applied(&self) -> Vec<(String, TileIndex)> {
        let mut applied = self.applied.lock().unwrap().clone();
        applied.sort();
        applied.dedup();
        applied
    }
}

impl Compositor for FakeCompositor {
    fn apply(&self, unit: &TileWorkUnit) -> Result<CompletionToken> {
        if self.failing.lock().unwrap().contains(&unit.tile_index) {
            bail!("hrscMosaic: exit status: 1");
        }
        Affine2::read_from(&unit.tile_to_tile_transform_path)?;
        let mut tile = OpenOptions::new().append(true).open(&unit.output_tile_path)?;
        writeln!(tile, "{} {}", unit.set_name, unit.piece_key)?;
        self.applied
            .lock()
            .unwrap()
            .push((unit.set_name.clone(), unit.tile_index));
        Ok(CompletionToken {
            tile: unit.tile_index,
            log_path: unit.tile_log_path.clone(),
        })
    }
}

/// A workspace with a catalog, a config pointing into a temp dir, and the fakes.
pub struct World {
    pub dir: TempDir,
    pub config: Config,
    pub scene: Arc<Scene>,
    pub downloader: Arc<FakeDownloader>,
    pub compositor: Arc<FakeCompositor>,
}

impl World {
    pub fn new(scene: Scene) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut config = Config::default();
        config.paths.basemap = root.join("base.tif");
        config.paths.catalog_db = root.join("planetary.db");
        config.paths.download_cache = root.join("hrscDownloadCache");
        config.paths.processed_dir = root.join("hrscProcessedFiles");
        config.paths.output_tiles = root.join("outputTiles");
        config.grid.tile_size_px = 100;
        config.grid.piece_size_px = 20;
        config.concurrency.download_threads = 2;
        config.concurrency.process_threads = 3;
        Self {
            dir,
            config,
            scene: Arc::new(scene),
            downloader: Arc::new(FakeDownloader::default()),
            compositor: Arc::new(FakeCompositor::default()),
        }
    }

    /// Files every channel in `channels` for `set_name`.
    pub fn catalog(&self, set_name: &str, channels: &[&str]) {
        let catalog = Catalog::open(&self.config.paths.catalog_db).unwrap();
        for channel in channels {
            let url = format!("https://pds.example/mex/hrsc/{}/{}_{}.img", set_name, set_name, channel);
            catalog
                .add_record(&self.config.catalog.sensor, channel, set_name, &url)
                .unwrap();
        }
    }

    pub fn raster(&self) -> Arc<dyn RasterTool> {
        Arc::new(FakeRaster {
            scene: self.scene.clone(),
        })
    }

    pub fn processor(&self) -> Arc<dyn ImageProcessor> {
        Arc::new(FakeProcessor {
            scene: self.scene.clone(),
        })
    }

    /// One degree tiles, so tile (row, col) covers lon [col - 180, col - 179].
    pub fn basemap(&self) -> Basemap {
        Basemap::new(
            self.config.paths.basemap.clone(),
            self.config.paths.output_tiles.clone(),
            GeoRect::new(-180.0, 180.0, -90.0, 90.0),
            (3600, 1800),
            self.config.grid.tile_size_px,
            1.0,
            self.raster(),
        )
    }

    pub fn tile_dir(&self, row: u32, col: u32) -> PathBuf {
        self.config
            .paths
            .output_tiles
            .join(TileIndex::new(row, col).postfix())
    }
}
