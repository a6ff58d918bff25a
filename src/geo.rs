// src/geo.rs

//! Degree-space rectangles, pixel windows and 2x3 affine transforms.
//!
//! Transforms are persisted as plain text, two lines of three numbers, which is
//! the format the external compositor reads.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Axis-aligned rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRect {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Geographic footprint of an input image. Immutable once computed.
pub type BoundingBox = GeoRect;

/// Degree-space extent of one output tile.
pub type TileRect = GeoRect;

impl GeoRect {
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    /// Smallest rectangle containing every point. `None` for an empty iterator.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut points = points.into_iter();
        let (lon, lat) = points.next()?;
        let mut rect = Self::new(lon, lon, lat, lat);
        for (lon, lat) in points {
            rect.min_lon = rect.min_lon.min(lon);
            rect.max_lon = rect.max_lon.max(lon);
            rect.min_lat = rect.min_lat.min(lat);
            rect.max_lat = rect.max_lat.max(lat);
        }
        Some(rect)
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn is_valid(&self) -> bool {
        [self.min_lon, self.max_lon, self.min_lat, self.max_lat]
            .iter()
            .all(|v| v.is_finite())
            && self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
    }

    /// Overlap with positive area. Rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &GeoRect) -> bool {
        self.min_lon < other.max_lon
            && other.min_lon < self.max_lon
            && self.min_lat < other.max_lat
            && other.min_lat < self.max_lat
    }
}

impl fmt::Display for GeoRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lon [{:.4}, {:.4}] lat [{:.4}, {:.4}]",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}

/// Pixel window inside a raster: origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelWindow {
    /// Splits a `width` x `height` raster into row-major windows of at most `size` pixels.
    pub fn split(width: u32, height: u32, size: u32) -> Vec<(u32, u32, PixelWindow)> {
        if size == 0 {
            return Vec::new();
        }
        let mut windows = Vec::new();
        for (row, y) in (0..height).step_by(size as usize).enumerate() {
            for (col, x) in (0..width).step_by(size as usize).enumerate() {
                windows.push((
                    row as u32,
                    col as u32,
                    PixelWindow {
                        x,
                        y,
                        width: size.min(width - x),
                        height: size.min(height - y),
                    },
                ));
            }
        }
        windows
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        let (w, h) = (self.width as f64, self.height as f64);
        [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
    }
}

/// 2x3 affine transform: `x' = a*x + b*y + c`, `y' = d*x + e*y + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine2 {
    pub m: [[f64; 3]; 2],
}

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2 {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            m: [[1.0, 0.0, dx], [0.0, 1.0, dy]],
        }
    }

    /// Scale followed by translation: `x' = sx*x + dx`, `y' = sy*y + dy`.
    pub fn scale_translate(sx: f64, sy: f64, dx: f64, dy: f64) -> Self {
        Self {
            m: [[sx, 0.0, dx], [0.0, sy, dy]],
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [r0, r1] = self.m;
        (
            r0[0] * x + r0[1] * y + r0[2],
            r1[0] * x + r1[1] * y + r1[2],
        )
    }

    /// The transform that applies `self` first and `next` second.
    pub fn then(&self, next: &Affine2) -> Affine2 {
        let [a0, a1] = self.m;
        let [b0, b1] = next.m;
        let row = |b: [f64; 3]| {
            [
                b[0] * a0[0] + b[1] * a1[0],
                b[0] * a0[1] + b[1] * a1[1],
                b[0] * a0[2] + b[1] * a1[2] + b[2],
            ]
        };
        Affine2 {
            m: [row(b0), row(b1)],
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let values: Vec<f64> = text
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .with_context(|| format!("invalid transform value {:?}", token))
            })
            .collect::<Result<_>>()?;
        if values.len() != 6 {
            bail!("expected 6 transform values, found {}", values.len());
        }
        if values.iter().any(|v| !v.is_finite()) {
            bail!("transform contains non-finite values");
        }
        Ok(Affine2 {
            m: [
                [values[0], values[1], values[2]],
                [values[3], values[4], values[5]],
            ],
        })
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read transform {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Malformed transform {}", path.display()))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())
            .with_context(|| format!("Failed to write transform {}", path.display()))
    }
}

impl fmt::Display for Affine2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.m {
            writeln!(f, "{} {} {}", row[0], row[1], row[2])?;
        }
        Ok(())
    }
}
