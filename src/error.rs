// src/error.rs

//! Error taxonomy for the mosaic pipeline.
//!
//! Most functions return `anyhow::Result`; the variants here are the ones a caller
//! needs to tell apart (via `downcast_ref`) to decide between skipping a data set,
//! skipping a tile, or aborting the run.

use crate::grid::TileIndex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MosaicError {
    /// Network or tool failure while preparing a data set. The set is retried whole
    /// on the next run.
    #[error("failed to fetch data set {set_name}: {reason}")]
    Fetch { set_name: String, reason: String },

    /// A descriptor could not be fully populated.
    #[error("data set {set_name} is missing {field}")]
    IncompleteMetadata {
        set_name: String,
        field: &'static str,
    },

    /// The compositor failed on one tile. Only that tile's completion is withheld.
    #[error("compositor failed on tile {tile}: {reason}")]
    Compositor { tile: TileIndex, reason: String },

    /// The fetch stage answered for a different data set than the one requested.
    #[error("fetch stage desynchronized: expected {expected}, got {got}")]
    ProtocolMismatch { expected: String, got: String },

    #[error("`{command}` failed: {status}")]
    ToolFailed { command: String, status: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid run log key {0:?}")]
    InvalidLogKey(String),
}

impl MosaicError {
    /// Errors after which the run must stop instead of moving to the next image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MosaicError::ProtocolMismatch { .. })
    }
}
