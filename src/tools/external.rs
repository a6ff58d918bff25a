// src/tools/external.rs

//! Download, image preparation and compositing programs.

use super::{run_command, write_all_atomically, write_atomically, CancelToken};
use crate::error::MosaicError;
use crate::grid::TileIndex;
use crate::planner::TileWorkUnit;
use anyhow::Result;
use log::*;
use std::path::{Path, PathBuf};
use std::process::Command;

pub trait Downloader: Send + Sync {
    /// Fetches `url` into `dest`. `dest` must not exist unless the download completed.
    fn download(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WgetDownloader {
    program: PathBuf,
}

impl WgetDownloader {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Downloader for WgetDownloader {
    fn download(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<()> {
        write_atomically(dest, |part| {
            run_command(
                Command::new(&self.program).arg("-q").arg(url).arg("-O").arg(part),
                cancel,
            )
        })
    }
}

/// Inputs and outputs of the per-image preparation step.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepJob {
    pub basemap: PathBuf,
    pub nadir: PathBuf,
    pub red: PathBuf,
    pub green: PathBuf,
    pub blue: PathBuf,
    pub nir: PathBuf,
    /// Affine transform from image pixels to basemap pixels.
    pub transform_out: PathBuf,
    /// Color image matched to the basemap, same pixel grid as `nadir`.
    pub color_out: PathBuf,
    pub mask_out: PathBuf,
}

/// Registers an image against the basemap and color-matches it.
pub trait ImageProcessor: Send + Sync {
    fn prepare(&self, job: &PrepJob, cancel: &CancelToken) -> Result<()>;
}

/// `ImageProcessor` running the registration and color transfer programs.
#[derive(Debug, Clone)]
pub struct HrscToolchain {
    register: PathBuf,
    color_transform: PathBuf,
}

impl HrscToolchain {
    pub fn new(register: impl Into<PathBuf>, color_transform: impl Into<PathBuf>) -> Self {
        Self {
            register: register.into(),
            color_transform: color_transform.into(),
        }
    }
}

impl ImageProcessor for HrscToolchain {
    fn prepare(&self, job: &PrepJob, cancel: &CancelToken) -> Result<()> {
        if !job.transform_out.exists() {
            write_atomically(&job.transform_out, |part| {
                run_command(
                    Command::new(&self.register)
                        .arg(&job.basemap)
                        .arg(&job.nadir)
                        .arg(part),
                    cancel,
                )
            })?;
        }
        if job.color_out.exists() && job.mask_out.exists() {
            debug!("Color products for {} already present", job.nadir.display());
            return Ok(());
        }
        // Both outputs appear together or not at all, so a failed or killed run
        // is redone in full next time.
        write_all_atomically(&[job.color_out.as_path(), job.mask_out.as_path()], |parts| {
            run_command(
                Command::new(&self.color_transform)
                    .arg(&job.basemap)
                    .arg(&job.red)
                    .arg(&job.green)
                    .arg(&job.blue)
                    .arg(&job.nir)
                    .arg(&job.nadir)
                    .arg(&job.transform_out)
                    .arg(&parts[0])
                    .arg(&parts[1]),
                cancel,
            )
        })
    }
}

/// Proof that one work unit has been composited onto its tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionToken {
    pub tile: TileIndex,
    /// Tile log that should record the image once every unit of the tile is done.
    pub log_path: PathBuf,
}

/// Blends one image piece into an output tile, mutating the tile in place.
pub trait Compositor: Send + Sync {
    fn apply(&self, unit: &TileWorkUnit) -> Result<CompletionToken>;
}

/// `Compositor` running `hrscMosaic <tile> <tile> <color> <mask> <transform>`.
#[derive(Debug, Clone)]
pub struct HrscMosaicCompositor {
    program: PathBuf,
}

impl HrscMosaicCompositor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Compositor for HrscMosaicCompositor {
    fn apply(&self, unit: &TileWorkUnit) -> Result<CompletionToken> {
        run_command(
            Command::new(&self.program)
                .arg(&unit.output_tile_path)
                .arg(&unit.output_tile_path)
                .arg(&unit.new_color_path)
                .arg(&unit.tile_mask_path)
                .arg(&unit.tile_to_tile_transform_path),
            &CancelToken::new(),
        )
        .map_err(|e| MosaicError::Compositor {
            tile: unit.tile_index,
            reason: format!("{:#}", e),
        })?;
        Ok(CompletionToken {
            tile: unit.tile_index,
            log_path: unit.tile_log_path.clone(),
        })
    }
}
