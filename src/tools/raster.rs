// src/tools/raster.rs

//! Raster conversion and metadata extraction.

use super::{capture_command, run_command, write_atomically, CancelToken};
use crate::geo::{BoundingBox, GeoRect, PixelWindow};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Metadata read from an image. Fields the tool could not find are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub bounding_box: Option<BoundingBox>,
    pub creation_time: Option<DateTime<Utc>>,
}

pub trait RasterTool: Send + Sync {
    /// Converts `src` into the working GeoTIFF format at `dst`.
    fn convert(&self, src: &Path, dst: &Path, cancel: &CancelToken) -> Result<()>;

    fn image_info(&self, path: &Path) -> Result<ImageInfo>;

    /// Copies the part of `src` covering `rect` into `dst`.
    fn crop(&self, src: &Path, rect: &GeoRect, dst: &Path) -> Result<()>;

    /// Resamples `src` to `width` x `height` pixels.
    fn resize(&self, src: &Path, width: u32, height: u32, dst: &Path) -> Result<()>;

    /// Copies a pixel window of `src` into `dst`.
    fn extract_window(
        &self,
        src: &Path,
        window: &PixelWindow,
        dst: &Path,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// `RasterTool` backed by `gdal_translate` and `gdalinfo`.
#[derive(Debug, Clone)]
pub struct GdalTool {
    translate: PathBuf,
    info: PathBuf,
}

impl GdalTool {
    pub fn new(translate: impl Into<PathBuf>, info: impl Into<PathBuf>) -> Self {
        Self {
            translate: translate.into(),
            info: info.into(),
        }
    }

    fn translate(&self) -> Command {
        let mut cmd = Command::new(&self.translate);
        cmd.args(["-q", "-of", "GTiff"]);
        cmd
    }
}

impl RasterTool for GdalTool {
    fn convert(&self, src: &Path, dst: &Path, cancel: &CancelToken) -> Result<()> {
        write_atomically(dst, |part| {
            run_command(self.translate().arg(src).arg(part), cancel)
        })
    }

    fn image_info(&self, path: &Path) -> Result<ImageInfo> {
        let json = capture_command(Command::new(&self.info).arg("-json").arg(path))?;
        parse_gdalinfo_json(&json)
            .with_context(|| format!("Failed to read image metadata of {}", path.display()))
    }

    fn crop(&self, src: &Path, rect: &GeoRect, dst: &Path) -> Result<()> {
        write_atomically(dst, |part| {
            let mut cmd = self.translate();
            cmd.arg("-projwin")
                .args([rect.min_lon, rect.max_lat, rect.max_lon, rect.min_lat].map(|v| v.to_string()))
                .arg(src)
                .arg(part);
            run_command(&mut cmd, &CancelToken::new())
        })
    }

    fn resize(&self, src: &Path, width: u32, height: u32, dst: &Path) -> Result<()> {
        write_atomically(dst, |part| {
            let mut cmd = self.translate();
            cmd.arg("-outsize")
                .args([width.to_string(), height.to_string()])
                .args(["-r", "bilinear"])
                .arg(src)
                .arg(part);
            run_command(&mut cmd, &CancelToken::new())
        })
    }

    fn extract_window(
        &self,
        src: &Path,
        window: &PixelWindow,
        dst: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        write_atomically(dst, |part| {
            let mut cmd = self.translate();
            cmd.arg("-srcwin")
                .args([window.x, window.y, window.width, window.height].map(|v| v.to_string()))
                .arg(src)
                .arg(part);
            run_command(&mut cmd, cancel)
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GdalInfo {
    size: [u32; 2],
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    wgs84_extent: Option<GeoJsonPolygon>,
    #[serde(default)]
    corner_coordinates: Option<CornerCoordinates>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonPolygon {
    coordinates: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CornerCoordinates {
    upper_left: [f64; 2],
    lower_left: [f64; 2],
    upper_right: [f64; 2],
    lower_right: [f64; 2],
}

/// Reads size, footprint and product creation time from `gdalinfo -json` output.
///
/// The footprint comes from `wgs84Extent` when GDAL could compute it, otherwise
/// from the corner coordinates (which are degrees for geographic rasters).
pub fn parse_gdalinfo_json(json: &str) -> Result<ImageInfo> {
    let info: GdalInfo = serde_json::from_str(json).context("Unexpected gdalinfo output")?;

    let bounding_box = match (&info.wgs84_extent, &info.corner_coordinates) {
        (Some(polygon), _) => GeoRect::enclosing(
            polygon
                .coordinates
                .iter()
                .flatten()
                .map(|&[lon, lat]| (lon, lat)),
        ),
        (None, Some(c)) => GeoRect::enclosing(
            [c.upper_left, c.lower_left, c.upper_right, c.lower_right]
                .into_iter()
                .map(|[lon, lat]| (lon, lat)),
        ),
        (None, None) => None,
    }
    .filter(GeoRect::is_valid);

    let creation_time = find_metadata(&info.metadata, "PRODUCT_CREATION_TIME")
        .map(|raw| parse_creation_time(&raw))
        .transpose()?;

    Ok(ImageInfo {
        width: info.size[0],
        height: info.size[1],
        bounding_box,
        creation_time,
    })
}

/// Searches every metadata domain for `key`.
fn find_metadata(metadata: &Value, key: &str) -> Option<String> {
    match metadata {
        Value::Object(map) => {
            if let Some(Value::String(v)) = map.get(key) {
                return Some(v.clone());
            }
            map.values().find_map(|v| find_metadata(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_metadata(v, key)),
        Value::String(line) => line
            .split_once('=')
            .filter(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.to_string()),
        _ => None,
    }
}

/// Accepts `2004-01-23T10:23:45.000Z`, with or without fractional seconds, quotes or `Z`.
pub fn parse_creation_time(raw: &str) -> Result<DateTime<Utc>> {
    let text = raw.trim().trim_matches('"');
    let text = text.strip_suffix('Z').unwrap_or(text);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    bail!("unrecognized creation time {:?}", raw)
}
