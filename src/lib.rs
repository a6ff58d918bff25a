// src/lib.rs

//! hrsc-mosaic library crate.
//!
//! Builds a planet-wide mosaic by compositing HRSC passes onto fixed-size basemap
//! tiles. Exposes the pipeline components for the binary and for testing.

pub mod basemap;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod geo;
pub mod grid;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod run_log;
pub mod tools;

pub use error::MosaicError;
