// src/grid/mod.rs

//! Fixed-size output tile grid.
//!
//! Maps degree-space coordinates to integer `(row, col)` tile indices and back.
//! Every tile owns the half-open interval `[k, k + 1)` in grid units along each
//! axis, so a coordinate exactly on a boundary always belongs to the tile that
//! starts there. Grid configuration never changes during a run; changing the
//! resolution or tile size invalidates every index and every tile log.

use crate::geo::{BoundingBox, GeoRect, TileRect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one output tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub row: u32,
    pub col: u32,
}

impl TileIndex {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Name fragment used for the tile's directory and derived files.
    pub fn postfix(&self) -> String {
        format!("{}_{}", self.row, self.col)
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Half-open block of tile indices, `[min_row, max_row) x [min_col, max_col)`.
///
/// This is a conservative candidate set: callers still have to check each tile
/// for real overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

impl TileRange {
    pub const EMPTY: TileRange = TileRange {
        min_row: 0,
        max_row: 0,
        min_col: 0,
        max_col: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.min_row >= self.max_row || self.min_col >= self.max_col
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        ((self.max_row - self.min_row) * (self.max_col - self.min_col)) as usize
    }

    /// Tiles in row-major order. This is the dispatch order of tile jobs.
    pub fn iter(&self) -> impl Iterator<Item = TileIndex> {
        let TileRange {
            min_row,
            max_row,
            min_col,
            max_col,
        } = *self;
        (min_row..max_row).flat_map(move |row| (min_col..max_col).map(move |col| TileIndex { row, col }))
    }
}

impl fmt::Display for TileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows [{}, {}) cols [{}, {})",
            self.min_row, self.max_row, self.min_col, self.max_col
        )
    }
}

/// Direction in which row indices grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOrder {
    /// Row 0 touches the origin latitude and rows grow southwards (raster layout).
    NorthDown,
    /// Row 0 touches the origin latitude and rows grow northwards.
    SouthUp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    origin_lon: f64,
    origin_lat: f64,
    tile_degrees: f64,
    rows: u32,
    cols: u32,
    row_order: RowOrder,
}

impl TileGrid {
    pub fn new(
        origin_lon: f64,
        origin_lat: f64,
        tile_degrees: f64,
        rows: u32,
        cols: u32,
        row_order: RowOrder,
    ) -> Self {
        Self {
            origin_lon,
            origin_lat,
            tile_degrees,
            rows,
            cols,
            row_order,
        }
    }

    /// Grid covering `extent` from its north-west corner. Edge tiles may extend
    /// past the extent.
    pub fn covering(extent: &GeoRect, tile_degrees: f64) -> Self {
        let rows = (extent.height() / tile_degrees).ceil().max(0.0) as u32;
        let cols = (extent.width() / tile_degrees).ceil().max(0.0) as u32;
        Self::new(
            extent.min_lon,
            extent.max_lat,
            tile_degrees,
            rows,
            cols,
            RowOrder::NorthDown,
        )
    }

    /// Degrees spanned by one tile of `tile_size_px` pixels at the given ground
    /// resolution on a sphere of `radius_m`.
    pub fn tile_degrees_for(meters_per_pixel: f64, tile_size_px: u32, radius_m: f64) -> f64 {
        let meters_per_degree = 2.0 * std::f64::consts::PI * radius_m / 360.0;
        meters_per_pixel * tile_size_px as f64 / meters_per_degree
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn tile_degrees(&self) -> f64 {
        self.tile_degrees
    }

    fn col_coord(&self, lon: f64) -> f64 {
        (lon - self.origin_lon) / self.tile_degrees
    }

    fn row_coord(&self, lat: f64) -> f64 {
        match self.row_order {
            RowOrder::NorthDown => (self.origin_lat - lat) / self.tile_degrees,
            RowOrder::SouthUp => (lat - self.origin_lat) / self.tile_degrees,
        }
    }

    /// Tile containing the point, or `None` outside the grid.
    pub fn tile_index_for(&self, lon: f64, lat: f64) -> Option<TileIndex> {
        let col = self.col_coord(lon).floor();
        let row = self.row_coord(lat).floor();
        if !(row >= 0.0 && col >= 0.0 && row < self.rows as f64 && col < self.cols as f64) {
            return None;
        }
        Some(TileIndex::new(row as u32, col as u32))
    }

    pub fn rect_degrees_for(&self, tile: TileIndex) -> TileRect {
        let min_lon = self.origin_lon + tile.col as f64 * self.tile_degrees;
        let max_lon = min_lon + self.tile_degrees;
        let (min_lat, max_lat) = match self.row_order {
            RowOrder::NorthDown => {
                let top = self.origin_lat - tile.row as f64 * self.tile_degrees;
                (top - self.tile_degrees, top)
            }
            RowOrder::SouthUp => {
                let bottom = self.origin_lat + tile.row as f64 * self.tile_degrees;
                (bottom, bottom + self.tile_degrees)
            }
        };
        GeoRect::new(min_lon, max_lon, min_lat, max_lat)
    }

    /// Candidate tiles for a bounding box, clipped to the grid.
    ///
    /// The lower edge of the box selects the tile that contains it, the upper edge
    /// is exclusive. A zero-width box lying on a boundary still selects the single
    /// tile that starts there.
    pub fn intersecting_tiles(&self, bbox: &BoundingBox) -> TileRange {
        if !bbox.is_valid() {
            return TileRange::EMPTY;
        }
        let (r0, r1) = {
            let a = self.row_coord(bbox.min_lat);
            let b = self.row_coord(bbox.max_lat);
            (a.min(b), a.max(b))
        };
        let (c0, c1) = (self.col_coord(bbox.min_lon), self.col_coord(bbox.max_lon));

        let (min_row, max_row) = Self::axis_span(r0, r1, self.rows);
        let (min_col, max_col) = Self::axis_span(c0, c1, self.cols);
        if min_row >= max_row || min_col >= max_col {
            return TileRange::EMPTY;
        }
        TileRange {
            min_row,
            max_row,
            min_col,
            max_col,
        }
    }

    fn axis_span(lo: f64, hi: f64, count: u32) -> (u32, u32) {
        let first = lo.floor();
        let last = hi.ceil().max(first + 1.0);
        let clamp = |v: f64| v.max(0.0).min(count as f64) as u32;
        (clamp(first), clamp(last))
    }
}
