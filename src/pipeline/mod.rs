// src/pipeline/mod.rs

//! The two concurrency domains of a run.
//!
//! - `fetch_actor`: one background thread that prepares the next data set while
//!   the current one is composited. Commands and responses travel over bounded
//!   channels; the driver never has more than one fetch outstanding.
//! - `tile_pool`: a fixed-size worker pool that composites the tiles of the
//!   current image and hands back one outcome per tile.

pub mod fetch_actor;
pub mod tile_pool;

pub use fetch_actor::FetchStage;
pub use tile_pool::{TileOutcome, TilePool};

use crate::cache::{ImageCache, PreparedImage};
use crate::tools::CancelToken;
use anyhow::Result;

/// Commands understood by the fetch stage. All three share one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCommand {
    /// Prepare a data set and answer with a `FetchResponse`.
    Fetch(String),
    /// Finish the fetch in flight, then exit.
    Stop,
    /// Abandon the fetch in flight (killing its tools) and exit.
    Kill,
}

#[derive(Debug)]
pub enum FetchResponse {
    Ready(Box<PreparedImage>),
    Failed { set_name: String, error: String },
}

impl FetchResponse {
    /// The data set this response answers for.
    pub fn set_name(&self) -> &str {
        match self {
            FetchResponse::Ready(image) => image.set_name(),
            FetchResponse::Failed { set_name, .. } => set_name,
        }
    }
}

/// Whatever turns a set name into a prepared image on the fetch thread.
pub trait DataSetSource: Send + 'static {
    fn load(&mut self, set_name: &str, cancel: &CancelToken) -> Result<PreparedImage>;
}

impl DataSetSource for ImageCache {
    fn load(&mut self, set_name: &str, cancel: &CancelToken) -> Result<PreparedImage> {
        ImageCache::load(self, set_name, cancel)
    }
}

/// The driver's side of the fetch stage.
pub trait FetchPort {
    fn send(&mut self, command: FetchCommand) -> Result<()>;
    /// Blocks until the next response arrives.
    fn recv(&mut self) -> Result<FetchResponse>;
}
