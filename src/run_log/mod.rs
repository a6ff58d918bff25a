// src/run_log/mod.rs

//! Append-only completion ledger.
//!
//! A run log is a text file of keys, one per line. The presence of a key means
//! "this key has been fully applied to the target this log belongs to"; there is
//! no other state. Only newline-terminated lines count, so a line cut short by a
//! crash is never read as a completion marker. Duplicate lines are harmless.
//!
//! Each log has a single writer at a time: the main log is written by the
//! orchestrator, a tile log only by the driver after that tile's job returned.

use crate::error::MosaicError;
use anyhow::{Context, Result};
use log::*;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means nothing has been logged yet.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let bytes = match self.read_bytes()? {
            Some(bytes) => bytes,
            None => return Ok(false),
        };
        let found = complete_lines(&bytes).any(|line| line == key.as_bytes());
        Ok(found)
    }

    /// All complete, well-formed keys in file order (duplicates included).
    pub fn keys(&self) -> Result<Vec<String>> {
        let bytes = match self.read_bytes()? {
            Some(bytes) => bytes,
            None => return Ok(Vec::new()),
        };
        Ok(complete_lines(&bytes)
            .filter_map(|line| std::str::from_utf8(line).ok())
            .filter(|line| validate_key(line).is_ok())
            .map(str::to_owned)
            .collect())
    }

    /// Records `key`. Safe to repeat; a second append only adds a duplicate line.
    pub fn append(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create run log directory {}", parent.display())
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("Failed to open run log {}", self.path.display()))?;

        // A torn trailing line from an earlier crash is cut off, so neither it nor
        // this key's newline can turn it into a completion marker.
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read run log {}", self.path.display()))?;
        let complete = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        if complete < bytes.len() {
            warn!(
                "RunLog: {} ends with a partial line, dropping {} bytes",
                self.path.display(),
                bytes.len() - complete
            );
            file.set_len(complete as u64)
                .with_context(|| format!("Failed to truncate run log {}", self.path.display()))?;
        }
        file.seek(SeekFrom::Start(complete as u64))?;

        let mut record = Vec::with_capacity(key.len() + 1);
        record.extend_from_slice(key.as_bytes());
        record.push(b'\n');

        file.write_all(&record)
            .and_then(|_| file.sync_data())
            .with_context(|| format!("Failed to append to run log {}", self.path.display()))?;
        trace!("RunLog: {} += {}", self.path.display(), key);
        Ok(())
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read run log {}", self.path.display()))
            }
        }
    }
}

/// Newline-terminated lines with a trailing `\r` removed. The unterminated tail is dropped.
fn complete_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let end = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    bytes[..end]
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn validate_key(key: &str) -> Result<(), MosaicError> {
    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(MosaicError::InvalidLogKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
