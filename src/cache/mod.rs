// src/cache/mod.rs

//! Local materialization of one data set.
//!
//! `fetch` downloads every channel of a set into `<download_cache>/<set>/`,
//! converts it to GeoTIFF and reads the footprint and creation time. `prepare`
//! then registers the set against the basemap and cuts the color image and mask
//! into pieces under `<processed_dir>/<set>/`.
//!
//! A file's presence is the only freshness check: a converted raster that
//! exists is reused without looking at the remote copy again. Files are written
//! under a temporary name and renamed, so presence never means "half written".

use crate::catalog::{Catalog, DataSetRecord};
use crate::config::Config;
use crate::error::MosaicError;
use crate::geo::{Affine2, BoundingBox, PixelWindow};
use crate::tools::{CancelToken, Downloader, ImageProcessor, PrepJob, RasterTool};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::*;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The five image channels of an HRSC data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Nadir,
    Red,
    Green,
    Blue,
    Nir,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Nadir,
        Channel::Red,
        Channel::Green,
        Channel::Blue,
        Channel::Nir,
    ];

    /// Catalog subtype, also the suffix of the product file name.
    pub fn subtype(self) -> &'static str {
        match self {
            Channel::Nadir => "nd3",
            Channel::Red => "re3",
            Channel::Green => "gr3",
            Channel::Blue => "bl3",
            Channel::Nir => "ir3",
        }
    }
}

/// Everything known about a fetched data set. Only built when every field is known.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetDescriptor {
    pub set_name: String,
    /// Catalog records with `local_paths = [converted raster, raw download]`.
    pub records: Vec<DataSetRecord>,
    pub bounding_box: BoundingBox,
    pub creation_time: DateTime<Utc>,
    /// Pixel size of the nadir raster, which every channel shares.
    pub width_px: u32,
    pub height_px: u32,
}

impl DataSetDescriptor {
    /// Converted raster for a channel.
    pub fn raster(&self, channel: Channel) -> Option<&Path> {
        self.records
            .iter()
            .find(|r| r.subtype == channel.subtype())
            .and_then(|r| r.local_paths.first())
            .map(PathBuf::as_path)
    }

    fn require_raster(&self, channel: Channel) -> Result<PathBuf> {
        self.raster(channel).map(Path::to_path_buf).ok_or_else(|| {
            MosaicError::IncompleteMetadata {
                set_name: self.set_name.clone(),
                field: channel.subtype(),
            }
            .into()
        })
    }
}

/// A square cut of the prepared color image and its mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePiece {
    /// Unique within the image; identifies the piece in per-tile work.
    pub key: String,
    /// Location in the image's pixel grid.
    pub window: PixelWindow,
    pub color_path: PathBuf,
    pub mask_path: PathBuf,
}

/// A data set ready for compositing.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub descriptor: DataSetDescriptor,
    /// Per-image scratch directory, owned by the fetch stage until handed over.
    pub work_dir: PathBuf,
    /// Image pixels to basemap pixels.
    pub registration: Affine2,
    pub pieces: Vec<ImagePiece>,
}

impl PreparedImage {
    pub fn set_name(&self) -> &str {
        &self.descriptor.set_name
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.descriptor.bounding_box
    }
}

/// External programs used by the cache.
#[derive(Clone)]
pub struct CacheTools {
    pub downloader: Arc<dyn Downloader>,
    pub raster: Arc<dyn RasterTool>,
    pub processor: Arc<dyn ImageProcessor>,
}

pub struct ImageCache {
    catalog: Catalog,
    download_root: PathBuf,
    processed_root: PathBuf,
    basemap: PathBuf,
    piece_size_px: u32,
    tools: CacheTools,
    pool: rayon::ThreadPool,
}

impl ImageCache {
    pub fn new(config: &Config, catalog: Catalog, tools: CacheTools) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency.download_threads)
            .thread_name(|i| format!("download-{}", i))
            .build()
            .context("Failed to build download pool")?;
        Ok(Self {
            catalog,
            download_root: config.paths.download_cache.clone(),
            processed_root: config.paths.processed_dir.clone(),
            basemap: config.paths.basemap.clone(),
            piece_size_px: config.grid.piece_size_px,
            tools,
            pool,
        })
    }

    /// Downloads, converts and describes a data set.
    pub fn fetch(&self, set_name: &str, cancel: &CancelToken) -> Result<DataSetDescriptor> {
        let records = self.catalog.records_for(set_name)?;
        if records.is_empty() {
            return Err(MosaicError::Fetch {
                set_name: set_name.to_string(),
                reason: "no catalog records".to_string(),
            }
            .into());
        }
        for channel in Channel::ALL {
            if !records.iter().any(|r| r.subtype == channel.subtype()) {
                return Err(MosaicError::IncompleteMetadata {
                    set_name: set_name.to_string(),
                    field: channel.subtype(),
                }
                .into());
            }
        }

        let set_dir = self.download_root.join(set_name);
        fs::create_dir_all(&set_dir)
            .with_context(|| format!("Failed to create cache directory {}", set_dir.display()))?;

        info!("ImageCache: fetching {} files for {}", records.len(), set_name);
        let tools = &self.tools;
        let records = self.pool.install(|| {
            records
                .into_par_iter()
                .map(|record| fetch_record(record, &set_dir, tools, cancel))
                .collect::<Result<Vec<_>>>()
        })?;

        self.describe(set_name, records)
    }

    fn describe(&self, set_name: &str, records: Vec<DataSetRecord>) -> Result<DataSetDescriptor> {
        let incomplete = |field| MosaicError::IncompleteMetadata {
            set_name: set_name.to_string(),
            field,
        };
        let nadir = records
            .iter()
            .find(|r| r.subtype == Channel::Nadir.subtype())
            .ok_or_else(|| incomplete(Channel::Nadir.subtype()))?;
        let (raster, raw) = match nadir.local_paths.as_slice() {
            [raster, raw, ..] => (raster, raw),
            _ => return Err(incomplete("local paths").into()),
        };

        let info = self.tools.raster.image_info(raster)?;
        let bounding_box = info
            .bounding_box
            .ok_or_else(|| incomplete("bounding box"))?;
        if info.width == 0 || info.height == 0 {
            return Err(incomplete("image size").into());
        }

        // The product creation time is part of the original label, so read the raw file.
        let creation_time = match info.creation_time {
            Some(t) if !raw.exists() => Some(t),
            fallback => match self.tools.raster.image_info(raw) {
                Ok(raw_info) => raw_info.creation_time.or(fallback),
                Err(e) => {
                    debug!("ImageCache: no metadata from {}: {:#}", raw.display(), e);
                    fallback
                }
            },
        }
        .ok_or_else(|| incomplete("creation time"))?;

        debug!(
            "ImageCache: {} covers {} ({}x{} px), created {}",
            set_name, bounding_box, info.width, info.height, creation_time
        );
        Ok(DataSetDescriptor {
            set_name: set_name.to_string(),
            records,
            bounding_box,
            creation_time,
            width_px: info.width,
            height_px: info.height,
        })
    }

    /// Registers a fetched set and cuts it into pieces.
    pub fn prepare(
        &self,
        descriptor: DataSetDescriptor,
        cancel: &CancelToken,
    ) -> Result<PreparedImage> {
        let set_name = descriptor.set_name.clone();
        let work_dir = self.processed_root.join(&set_name);
        let piece_dir = work_dir.join("pieces");
        fs::create_dir_all(&piece_dir)
            .with_context(|| format!("Failed to create {}", piece_dir.display()))?;

        let job = PrepJob {
            basemap: self.basemap.clone(),
            nadir: descriptor.require_raster(Channel::Nadir)?,
            red: descriptor.require_raster(Channel::Red)?,
            green: descriptor.require_raster(Channel::Green)?,
            blue: descriptor.require_raster(Channel::Blue)?,
            nir: descriptor.require_raster(Channel::Nir)?,
            transform_out: work_dir.join("registration.txt"),
            color_out: work_dir.join("color.tif"),
            mask_out: work_dir.join("mask.tif"),
        };
        info!("ImageCache: preparing {}", set_name);
        self.tools
            .processor
            .prepare(&job, cancel)
            .with_context(|| format!("Failed to register {}", set_name))?;
        let registration = Affine2::read_from(&job.transform_out)?;

        let pieces: Vec<ImagePiece> =
            PixelWindow::split(descriptor.width_px, descriptor.height_px, self.piece_size_px)
                .into_iter()
                .map(|(row, col, window)| {
                    let key = format!("piece_{}_{}", row, col);
                    ImagePiece {
                        color_path: piece_dir.join(format!("{}_color.tif", key)),
                        mask_path: piece_dir.join(format!("{}_mask.tif", key)),
                        key,
                        window,
                    }
                })
                .collect();

        let raster = &self.tools.raster;
        self.pool.install(|| {
            pieces.par_iter().try_for_each(|piece| {
                cancel.check()?;
                for (src, dst) in [(&job.color_out, &piece.color_path), (&job.mask_out, &piece.mask_path)] {
                    if !dst.exists() {
                        raster.extract_window(src, &piece.window, dst, cancel)?;
                    }
                }
                Ok::<_, anyhow::Error>(())
            })
        })?;
        info!("ImageCache: {} prepared as {} pieces", set_name, pieces.len());

        Ok(PreparedImage {
            descriptor,
            work_dir,
            registration,
            pieces,
        })
    }

    /// `fetch` followed by `prepare`.
    pub fn load(&self, set_name: &str, cancel: &CancelToken) -> Result<PreparedImage> {
        let descriptor = self.fetch(set_name, cancel)?;
        cancel.check()?;
        self.prepare(descriptor, cancel)
    }
}

/// Last path segment of a URL, without query or fragment.
fn url_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

fn fetch_record(
    mut record: DataSetRecord,
    set_dir: &Path,
    tools: &CacheTools,
    cancel: &CancelToken,
) -> Result<DataSetRecord> {
    let file_name = match url_file_name(&record.source_url) {
        Some(name) => name,
        None => bail!("cannot derive a file name from {}", record.source_url),
    };
    let raw = set_dir.join(file_name);
    let raster = raw.with_extension("tif");

    if raster.exists() {
        debug!("ImageCache: reusing {}", raster.display());
    } else {
        if raw.exists() {
            debug!("ImageCache: reusing download {}", raw.display());
        } else {
            cancel.check()?;
            tools
                .downloader
                .download(&record.source_url, &raw, cancel)
                .map_err(|e| MosaicError::Fetch {
                    set_name: record.set_name.clone(),
                    reason: format!("{}: {:#}", record.source_url, e),
                })?;
        }
        cancel.check()?;
        tools
            .raster
            .convert(&raw, &raster, cancel)
            .with_context(|| format!("Failed to convert {}", raw.display()))?;
    }

    record.local_paths = vec![raster, raw];
    Ok(record)
}
