// src/tools/mod.rs

//! External programs behind capability traits.
//!
//! Downloading, raster conversion, registration and compositing are all done by
//! third-party executables. The pipeline only talks to the traits defined here,
//! so tests can swap in fakes that record calls instead of touching rasters.

pub mod external;
pub mod raster;

pub use external::{
    CompletionToken, Compositor, Downloader, HrscMosaicCompositor, HrscToolchain, ImageProcessor,
    PrepJob, WgetDownloader,
};
pub use raster::{GdalTool, ImageInfo, RasterTool};

use crate::error::MosaicError;
use anyhow::{Context, Result};
use log::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often a running child is checked for exit or cancellation.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag raised when in-flight work must be abandoned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been raised.
    pub fn check(&self) -> Result<(), MosaicError> {
        if self.is_cancelled() {
            Err(MosaicError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs a command to completion. A raised `cancel` kills the child.
pub fn run_command(cmd: &mut Command, cancel: &CancelToken) -> Result<()> {
    let command = describe(cmd);
    cancel.check()?;
    debug!("Running: {}", command);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start `{}`", command))?;

    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to wait for `{}`", command))?
        {
            if status.success() {
                trace!("Finished: {}", command);
                return Ok(());
            }
            return Err(MosaicError::ToolFailed {
                command,
                status: status.to_string(),
            }
            .into());
        }
        if cancel.is_cancelled() {
            warn!("Killing `{}` after cancellation", command);
            if let Err(e) = child.kill() {
                warn!("Failed to kill `{}`: {}", command, e);
            }
            let _ = child.wait();
            return Err(MosaicError::Cancelled.into());
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }
}

/// Runs a short command and returns its standard output.
pub fn capture_command(cmd: &mut Command) -> Result<String> {
    let command = describe(cmd);
    debug!("Running: {}", command);
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to start `{}`", command))?;
    if !output.status.success() {
        return Err(MosaicError::ToolFailed {
            command,
            status: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `produce` against a `.part` sibling of `dst` and renames it into place on
/// success, so `dst` only ever exists complete.
pub fn write_atomically<F>(dst: &Path, produce: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    write_all_atomically(&[dst], |parts| produce(&parts[0]))
}

/// Like `write_atomically` for a tool that writes several outputs in one go.
/// Nothing is moved into place unless `produce` succeeds for all of them.
pub fn write_all_atomically<F>(dsts: &[&Path], produce: F) -> Result<()>
where
    F: FnOnce(&[PathBuf]) -> Result<()>,
{
    let parts: Vec<PathBuf> = dsts.iter().map(|dst| part_path(dst)).collect();

    let result = produce(&parts).and_then(|_| {
        parts.iter().zip(dsts).try_for_each(|(part, dst)| {
            fs::rename(part, dst)
                .with_context(|| format!("Failed to move {} into place", dst.display()))
        })
    });
    if result.is_err() {
        for part in parts.iter().filter(|part| part.exists()) {
            if let Err(e) = fs::remove_file(part) {
                warn!("Failed to remove partial file {}: {}", part.display(), e);
            }
        }
    }
    result
}

fn part_path(dst: &Path) -> PathBuf {
    let mut part = dst.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

#[cfg(test)]
mod tests;
