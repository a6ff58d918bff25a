// src/pipeline/tile_pool.rs

//! Compositing pool for the tiles of the current image.
//!
//! Each tile is one pool job that runs the tile's units one after another, so a
//! tile's output file only ever has one writer. Tiles run in parallel and the
//! outcomes come back in submission order.

use crate::error::MosaicError;
use crate::grid::TileIndex;
use crate::planner::TileJob;
use crate::tools::{CompletionToken, Compositor};
use anyhow::{Context, Result};
use log::*;
use rayon::prelude::*;
use std::path::PathBuf;

/// Result of compositing one tile.
#[derive(Debug)]
pub struct TileOutcome {
    pub tile: TileIndex,
    pub log_path: PathBuf,
    /// Completion of the tile's last unit, or the first unit failure.
    pub result: Result<CompletionToken>,
}

impl TileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct TilePool {
    pool: rayon::ThreadPool,
}

impl TilePool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tile-{}", i))
            .build()
            .context("Failed to build tile pool")?;
        info!("TilePool: {} workers", threads);
        Ok(Self { pool })
    }

    /// Composites every job and waits for all of them.
    pub fn run(&self, jobs: &[TileJob], compositor: &dyn Compositor) -> Vec<TileOutcome> {
        self.pool.install(|| {
            jobs.par_iter()
                .map(|job| TileOutcome {
                    tile: job.tile,
                    log_path: job.log_path.clone(),
                    result: run_job(job, compositor),
                })
                .collect()
        })
    }
}

fn run_job(job: &TileJob, compositor: &dyn Compositor) -> Result<CompletionToken> {
    let mut last = None;
    for (key, unit) in &job.units {
        trace!("TilePool: tile {} piece {}", job.tile, key);
        let token = compositor.apply(unit)?;
        if token.tile != job.tile || token.log_path != job.log_path {
            return Err(MosaicError::Compositor {
                tile: job.tile,
                reason: format!("completion reported for tile {}", token.tile),
            }
            .into());
        }
        last = Some(token);
    }
    last.ok_or_else(|| {
        MosaicError::Compositor {
            tile: job.tile,
            reason: "no work units".to_string(),
        }
        .into()
    })
}
