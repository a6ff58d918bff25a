// src/orchestrator/mod.rs

//! The driver loop.
//!
//! Walks the pending data sets in order with one fetch always running ahead:
//! `Fetch(i + 1)` goes out as soon as the response for `i` is in hand, then
//! image `i` is planned and composited on the tile pool. When every tile result
//! is back, the tile logs are written first and the main log entry last, so a
//! crash in between only causes work to be redone, never skipped.

use crate::basemap::Basemap;
use crate::cache::PreparedImage;
use crate::error::MosaicError;
use crate::pipeline::{FetchCommand, FetchPort, FetchResponse, TilePool};
use crate::planner::TileUpdatePlanner;
use crate::run_log::RunLog;
use crate::tools::Compositor;
use anyhow::Result;
use log::*;
use std::collections::HashSet;
use std::sync::Arc;

/// What happened to one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageOutcome {
    pub tiles_written: usize,
    pub tiles_failed: usize,
    /// Tiles whose log already recorded the image.
    pub tiles_skipped: usize,
}

impl ImageOutcome {
    pub fn is_complete(&self) -> bool {
        self.tiles_failed == 0
    }
}

/// Totals for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Images recorded in the main log.
    pub applied: Vec<String>,
    /// Images with at least one failed tile; retried on the next run.
    pub partially_applied: Vec<String>,
    pub fetch_failed: Vec<String>,
    pub tiles_written: usize,
    pub tiles_failed: usize,
    pub tiles_skipped: usize,
}

impl RunSummary {
    fn record(&mut self, set_name: &str, outcome: ImageOutcome) {
        self.tiles_written += outcome.tiles_written;
        self.tiles_failed += outcome.tiles_failed;
        self.tiles_skipped += outcome.tiles_skipped;
        if outcome.is_complete() {
            self.applied.push(set_name.to_string());
        } else {
            self.partially_applied.push(set_name.to_string());
        }
    }
}

pub struct Orchestrator {
    planner: TileUpdatePlanner,
    pool: TilePool,
    compositor: Arc<dyn Compositor>,
    main_log: RunLog,
}

impl Orchestrator {
    pub fn new(basemap: Basemap, process_threads: usize, compositor: Arc<dyn Compositor>) -> Result<Self> {
        let main_log = basemap.main_log();
        Ok(Self {
            planner: TileUpdatePlanner::new(basemap),
            pool: TilePool::new(process_threads)?,
            compositor,
            main_log,
        })
    }

    pub fn main_log(&self) -> &RunLog {
        &self.main_log
    }

    /// Catalog sets minus those the main log records, in catalog order.
    pub fn pending_sets(&self, catalog_sets: Vec<String>) -> Result<Vec<String>> {
        pending_sets(&self.main_log, catalog_sets)
    }

    /// Processes `sets` in order. On a fatal error the fetch stage is killed and
    /// the error returned; anything not yet logged is redone by the next run.
    pub fn run(&self, port: &mut dyn FetchPort, sets: &[String]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        match self.drive(port, sets, &mut summary) {
            Ok(()) => {
                port.send(FetchCommand::Stop)?;
                info!(
                    "Orchestrator: run finished: {} applied, {} partial, {} failed to fetch; tiles {} written, {} failed, {} skipped",
                    summary.applied.len(),
                    summary.partially_applied.len(),
                    summary.fetch_failed.len(),
                    summary.tiles_written,
                    summary.tiles_failed,
                    summary.tiles_skipped
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Orchestrator: aborting run: {:#}", e);
                if let Err(kill_err) = port.send(FetchCommand::Kill) {
                    debug!("Orchestrator: fetch stage already gone: {:#}", kill_err);
                }
                Err(e)
            }
        }
    }

    fn drive(&self, port: &mut dyn FetchPort, sets: &[String], summary: &mut RunSummary) -> Result<()> {
        let Some(first) = sets.first() else {
            info!("Orchestrator: nothing to do");
            return Ok(());
        };
        port.send(FetchCommand::Fetch(first.clone()))?;

        for (i, expected) in sets.iter().enumerate() {
            let response = port.recv()?;
            if response.set_name() != expected {
                return Err(MosaicError::ProtocolMismatch {
                    expected: expected.clone(),
                    got: response.set_name().to_string(),
                }
                .into());
            }
            if let Some(next) = sets.get(i + 1) {
                port.send(FetchCommand::Fetch(next.clone()))?;
            }

            match response {
                FetchResponse::Failed { set_name, error } => {
                    error!("Orchestrator: [{}/{}] {}: fetch failed, skipping: {}", i + 1, sets.len(), set_name, error);
                    summary.fetch_failed.push(set_name);
                }
                FetchResponse::Ready(image) => {
                    info!("Orchestrator: [{}/{}] applying {}", i + 1, sets.len(), image.set_name());
                    let outcome = self.apply_image(&image)?;
                    summary.record(image.set_name(), outcome);
                }
            }
        }
        Ok(())
    }

    /// Composites one image onto every tile it reaches and commits the logs.
    pub fn apply_image(&self, image: &PreparedImage) -> Result<ImageOutcome> {
        let set_name = image.set_name();
        let plan = self.planner.plan(image)?;
        let outcomes = self.pool.run(&plan.jobs, self.compositor.as_ref());

        let mut outcome = ImageOutcome {
            tiles_failed: plan.unprepared.len(),
            tiles_skipped: plan.already_applied.len(),
            ..Default::default()
        };
        for tile in outcomes {
            match tile.result {
                Ok(token) => {
                    RunLog::at(token.log_path).append(set_name)?;
                    outcome.tiles_written += 1;
                }
                Err(e) => {
                    error!("Orchestrator: {} tile {}: {:#}", set_name, tile.tile, e);
                    outcome.tiles_failed += 1;
                }
            }
        }

        if outcome.is_complete() {
            self.main_log.append(set_name)?;
            info!(
                "Orchestrator: {} applied ({} tiles written, {} already done)",
                set_name, outcome.tiles_written, outcome.tiles_skipped
            );
        } else {
            warn!(
                "Orchestrator: {} incomplete, {} tiles failed; leaving it out of {}",
                set_name,
                outcome.tiles_failed,
                self.main_log.path().display()
            );
        }
        Ok(outcome)
    }
}

/// `catalog_sets` minus the sets `main_log` records, in catalog order.
pub fn pending_sets(main_log: &RunLog, catalog_sets: Vec<String>) -> Result<Vec<String>> {
    let done: HashSet<String> = main_log.keys()?.into_iter().collect();
    let total = catalog_sets.len();
    let pending: Vec<String> = catalog_sets
        .into_iter()
        .filter(|name| !done.contains(name))
        .collect();
    info!(
        "Orchestrator: {} of {} catalog sets pending ({} in {})",
        pending.len(),
        total,
        done.len(),
        main_log.path().display()
    );
    Ok(pending)
}
