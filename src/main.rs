// src/main.rs

//! `hrsc-mosaic`: composites pending HRSC data sets onto the basemap tiles.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hrsc_mosaic::basemap::Basemap;
use hrsc_mosaic::cache::{CacheTools, ImageCache};
use hrsc_mosaic::catalog::Catalog;
use hrsc_mosaic::config::Config;
use hrsc_mosaic::geo::GeoRect;
use hrsc_mosaic::orchestrator::{pending_sets, Orchestrator};
use hrsc_mosaic::pipeline::FetchStage;
use hrsc_mosaic::tools::{GdalTool, HrscMosaicCompositor, HrscToolchain, RasterTool, WgetDownloader};
use log::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hrsc-mosaic", version, about = "Composite HRSC passes onto basemap tiles")]
struct Cli {
    /// JSON config file; defaults apply to everything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Fetch and composite every data set not yet in the main log
    Run {
        /// Stop after this many data sets
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List the data sets the next run would process
    Pending,
    /// Print the tiles a lon/lat box falls on
    Tiles {
        #[arg(allow_negative_numbers = true)]
        min_lon: f64,
        #[arg(allow_negative_numbers = true)]
        max_lon: f64,
        #[arg(allow_negative_numbers = true)]
        min_lat: f64,
        #[arg(allow_negative_numbers = true)]
        max_lat: f64,
    },
}

fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_micros();
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = dir.join(format!("hrscMosaicLog_{}.txt", stamp));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn raster_tool(config: &Config) -> Arc<dyn RasterTool> {
    Arc::new(GdalTool::new(
        &config.tools.gdal_translate,
        &config.tools.gdalinfo,
    ))
}

fn cmd_run(config: &Config, limit: Option<usize>) -> Result<()> {
    let raster = raster_tool(config);
    let basemap = Basemap::open(config, raster.clone())?;
    let catalog = Catalog::open(&config.paths.catalog_db)?;

    let mut sets = pending_sets(
        &basemap.main_log(),
        catalog.list_set_names(&config.catalog.sensor)?,
    )?;
    if let Some(limit) = limit {
        sets.truncate(limit);
    }

    let compositor = Arc::new(HrscMosaicCompositor::new(&config.tools.compositor));
    let orchestrator = Orchestrator::new(basemap, config.concurrency.process_threads, compositor)?;

    let tools = CacheTools {
        downloader: Arc::new(WgetDownloader::new(&config.tools.wget)),
        raster,
        processor: Arc::new(HrscToolchain::new(
            &config.tools.register,
            &config.tools.color_transform,
        )),
    };
    let cache = ImageCache::new(config, catalog, tools)?;
    let mut stage = FetchStage::spawn(cache)?;

    let result = orchestrator.run(&mut stage, &sets);
    // Joins the fetch thread after Stop or Kill.
    drop(stage);
    let summary = result?;

    if !summary.partially_applied.is_empty() || !summary.fetch_failed.is_empty() {
        warn!(
            "Incomplete data sets will be retried next run: {:?} {:?}",
            summary.partially_applied, summary.fetch_failed
        );
    }
    Ok(())
}

fn cmd_pending(config: &Config) -> Result<()> {
    let catalog = Catalog::open(&config.paths.catalog_db)?;
    let main_log = Basemap::main_log_at(&config.paths.output_tiles);
    for set_name in pending_sets(&main_log, catalog.list_set_names(&config.catalog.sensor)?)? {
        println!("{}", set_name);
    }
    Ok(())
}

fn cmd_tiles(config: &Config, bbox: GeoRect) -> Result<()> {
    let basemap = Basemap::open(config, raster_tool(config))?;
    let range = basemap.grid().intersecting_tiles(&bbox);
    info!("{} -> {} ({} tiles)", bbox, range, range.len());
    for tile in range.iter() {
        println!("{}\t{}", tile.postfix(), basemap.tile_rect_degrees(tile));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };
    init_logging(config.paths.log_dir.as_deref())?;
    info!("Starting hrsc-mosaic...");

    match cli.command {
        Cmd::Run { limit } => cmd_run(&config, limit),
        Cmd::Pending => cmd_pending(&config),
        Cmd::Tiles {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        } => cmd_tiles(&config, GeoRect::new(min_lon, max_lon, min_lat, max_lat)),
    }
}
