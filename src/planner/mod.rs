// src/planner/mod.rs

//! Turns a prepared image into per-tile work.
//!
//! The tile grid gives a conservative range of candidate tiles. For each
//! candidate the tile log is consulted first; tiles that already record the
//! image are skipped without any geometry. The remaining tiles are matched
//! against every image piece with the exact piece-to-tile transform, and only
//! pieces that really overlap the tile become work units.

use crate::basemap::Basemap;
use crate::cache::{ImagePiece, PreparedImage};
use crate::geo::{Affine2, GeoRect};
use crate::grid::{TileIndex, TileRange};
use crate::run_log::RunLog;
use anyhow::{Context, Result};
use log::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Overlaps thinner than this many tile pixels are rounding noise from a shared edge.
const MIN_OVERLAP_PX: f64 = 1e-6;

/// One compositor call: blend one image piece into one output tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileWorkUnit {
    pub set_name: String,
    pub piece_key: String,
    pub tile_index: TileIndex,
    pub output_tile_path: PathBuf,
    pub new_color_path: PathBuf,
    pub tile_mask_path: PathBuf,
    /// Piece pixels to tile pixels.
    pub tile_to_tile_transform_path: PathBuf,
    pub tile_log_path: PathBuf,
}

/// All work for one tile, keyed by piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileJob {
    pub tile: TileIndex,
    pub log_path: PathBuf,
    pub units: BTreeMap<String, TileWorkUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePlan {
    /// Tiles to composite, in row-major order.
    pub jobs: Vec<TileJob>,
    /// Tiles whose log already records the image.
    pub already_applied: Vec<TileIndex>,
    /// Tiles that need work but whose output could not be set up.
    pub unprepared: Vec<TileIndex>,
}

impl ImagePlan {
    pub fn unit_count(&self) -> usize {
        self.jobs.iter().map(|job| job.units.len()).sum()
    }
}

pub struct TileUpdatePlanner {
    basemap: Basemap,
}

impl TileUpdatePlanner {
    pub fn new(basemap: Basemap) -> Self {
        Self { basemap }
    }

    pub fn basemap(&self) -> &Basemap {
        &self.basemap
    }

    /// Candidate tiles from the image footprint. Conservative; may include tiles
    /// the image does not touch.
    pub fn covered_tiles(&self, image: &PreparedImage) -> TileRange {
        self.basemap.grid().intersecting_tiles(image.bounding_box())
    }

    /// Piece pixels to pixels of `tile`.
    pub fn piece_to_tile(&self, image: &PreparedImage, piece: &ImagePiece, tile: TileIndex) -> Affine2 {
        Affine2::translation(piece.window.x as f64, piece.window.y as f64)
            .then(&image.registration)
            .then(&self.basemap.pixel_to_degrees())
            .then(&self.basemap.degrees_to_tile_pixels(tile))
    }

    fn overlaps(&self, transform: &Affine2, piece: &ImagePiece) -> bool {
        let corners = piece
            .window
            .corners()
            .into_iter()
            .map(|(x, y)| transform.apply(x, y));
        let Some(footprint) = GeoRect::enclosing(corners) else {
            return false;
        };
        let size = self.basemap.tile_size_px() as f64;
        let overlap_w = footprint.max_lon.min(size) - footprint.min_lon.max(0.0);
        let overlap_h = footprint.max_lat.min(size) - footprint.min_lat.max(0.0);
        overlap_w > MIN_OVERLAP_PX && overlap_h > MIN_OVERLAP_PX
    }

    /// Work units for every piece of `image` that overlaps `tile`, keyed by piece.
    /// Writes the piece-to-tile transform each unit refers to.
    pub fn tile_work_units_for(
        &self,
        tile: TileIndex,
        image: &PreparedImage,
    ) -> Result<BTreeMap<String, TileWorkUnit>> {
        let paths = self.basemap.tile_paths(tile);
        let transform_dir = image.work_dir.join("tiles");
        let mut units = BTreeMap::new();

        for piece in &image.pieces {
            let transform = self.piece_to_tile(image, piece, tile);
            if !self.overlaps(&transform, piece) {
                continue;
            }
            fs::create_dir_all(&transform_dir)
                .with_context(|| format!("Failed to create {}", transform_dir.display()))?;
            let transform_path =
                transform_dir.join(format!("{}_{}_transform.txt", piece.key, tile.postfix()));
            transform.write_to(&transform_path)?;

            units.insert(
                piece.key.clone(),
                TileWorkUnit {
                    set_name: image.set_name().to_string(),
                    piece_key: piece.key.clone(),
                    tile_index: tile,
                    output_tile_path: paths.output.clone(),
                    new_color_path: piece.color_path.clone(),
                    tile_mask_path: piece.mask_path.clone(),
                    tile_to_tile_transform_path: transform_path,
                    tile_log_path: paths.log.clone(),
                },
            );
        }
        Ok(units)
    }

    /// Plans the update of every tile the image touches.
    pub fn plan(&self, image: &PreparedImage) -> Result<ImagePlan> {
        let set_name = image.set_name();
        let range = self.covered_tiles(image);
        info!(
            "Planner: {} covers {} -> candidate tiles {}",
            set_name,
            image.bounding_box(),
            range
        );

        let mut plan = ImagePlan::default();
        for tile in range.iter() {
            let log = RunLog::at(self.basemap.tile_paths(tile).log);
            if log.contains(set_name)? {
                debug!("Planner: tile {} already has {}", tile, set_name);
                plan.already_applied.push(tile);
                continue;
            }

            let units = match self.tile_work_units_for(tile, image) {
                Ok(units) => units,
                Err(e) => {
                    error!("Planner: tile {} for {}: {:#}", tile, set_name, e);
                    plan.unprepared.push(tile);
                    continue;
                }
            };
            if units.is_empty() {
                trace!("Planner: {} does not reach tile {}", set_name, tile);
                continue;
            }

            if let Err(e) = self.basemap.ensure_tile_images(tile) {
                error!("Planner: tile {} for {}: {:#}", tile, set_name, e);
                plan.unprepared.push(tile);
                continue;
            }
            plan.jobs.push(TileJob {
                tile,
                log_path: log.path().to_path_buf(),
                units,
            });
        }

        info!(
            "Planner: {} -> {} tiles ({} units), {} already applied",
            set_name,
            plan.jobs.len(),
            plan.unit_count(),
            plan.already_applied.len()
        );
        Ok(plan)
    }
}
