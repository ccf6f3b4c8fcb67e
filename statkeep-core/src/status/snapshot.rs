//! Plain-text snapshot of process-wide counters.
//!
//! One `key=value` pair per line:
//!
//! ```text
//! uploaded=1024
//! downloaded=4096
//! version=0.1.0
//! ```
//!
//! Blank lines and `#` comments are ignored when reading.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::StatusError;

/// Version identifier stamped into every snapshot this build writes.
pub const SNAPSHOT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cumulative totals persisted when the aggregator terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub uploaded: u64,
    pub downloaded: u64,
    pub version: String,
}

impl CountersSnapshot {
    /// Snapshot stamped with the running crate version.
    pub fn new(uploaded: u64, downloaded: u64) -> Self {
        Self {
            uploaded,
            downloaded,
            version: SNAPSHOT_VERSION.to_string(),
        }
    }

    /// Renders the snapshot in its on-disk form.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "uploaded={}", self.uploaded);
        let _ = writeln!(out, "downloaded={}", self.downloaded);
        let _ = writeln!(out, "version={}", self.version);
        out
    }

    /// Parses the on-disk form. `path` is only used for error context.
    ///
    /// # Errors
    /// - `StatusError::InvalidSnapshot` - Unknown key, malformed line or number, missing key
    pub fn parse(text: &str, path: &Path) -> Result<Self, StatusError> {
        let invalid = |reason: String| StatusError::InvalidSnapshot {
            path: path.to_path_buf(),
            reason,
        };

        let mut uploaded = None;
        let mut downloaded = None;
        let mut version = None;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| invalid(format!("line {}: expected key=value", number + 1)))?;
            let (key, value) = (key.trim(), value.trim());
            let parse_count = |value: &str| {
                value
                    .parse::<u64>()
                    .map_err(|e| invalid(format!("line {}: {key}: {e}", number + 1)))
            };
            match key {
                "uploaded" => uploaded = Some(parse_count(value)?),
                "downloaded" => downloaded = Some(parse_count(value)?),
                "version" => version = Some(value.to_string()),
                other => return Err(invalid(format!("line {}: unknown key {other}", number + 1))),
            }
        }

        Ok(Self {
            uploaded: uploaded.ok_or_else(|| invalid("missing uploaded".to_string()))?,
            downloaded: downloaded.ok_or_else(|| invalid("missing downloaded".to_string()))?,
            version: version.ok_or_else(|| invalid("missing version".to_string()))?,
        })
    }

    /// Writes the snapshot through a temporary file and renames it into place.
    ///
    /// # Errors
    /// - `StatusError::Io` - Parent directory or file could not be written
    pub fn write_to(&self, path: &Path) -> Result<(), StatusError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path_for(path);
        fs::write(&tmp_path, self.to_text())?;
        fs::rename(&tmp_path, path)?;
        tracing::trace!(path = %path.display(), "wrote counters snapshot");
        Ok(())
    }

    /// Reads a snapshot, returning `None` when the file does not exist.
    ///
    /// # Errors
    /// - `StatusError::Io` - File exists but could not be read
    /// - `StatusError::InvalidSnapshot` - File contents are malformed
    pub fn read_from(path: &Path) -> Result<Option<Self>, StatusError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
