//! Snapshot persistence.
//!
//! Every snapshot is written as UTF-8 JSON with 4-space indentation to a new
//! file whose name embeds the local time of the run. Existing files are never
//! overwritten.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::processing::NormalizeSummary;

pub const FILE_PREFIX: &str = "station_status_";
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("snapshot {} already exists", .path.display())]
    AlreadyExists { path: PathBuf },
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// `station_status_YYYY-MM-DD_HH-MM-SS.json` for the given local time.
pub fn snapshot_file_name(now: NaiveDateTime) -> String {
    format!("{}{}.json", FILE_PREFIX, now.format(FILE_TIMESTAMP_FORMAT))
}

/// Serializes a document with 4-space indentation. Non-ASCII characters are
/// kept as-is rather than escaped.
pub fn to_pretty_json(document: &Value) -> Result<Vec<u8>, OutputError> {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    document.serialize(&mut serializer)?;
    Ok(buf)
}

/// Logs a normalization summary as pretty-printed JSON.
pub fn print_summary(summary: &NormalizeSummary) -> Result<(), OutputError> {
    debug!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Writes `document` to a new snapshot file inside `dir`.
///
/// `dir` is created if it does not exist yet.
///
/// # Errors
///
/// Returns [`OutputError::AlreadyExists`] if a snapshot for the same second
/// is already on disk.
#[tracing::instrument(skip(document))]
pub fn write_snapshot(
    dir: &Path,
    document: &Value,
    now: NaiveDateTime,
) -> Result<PathBuf, OutputError> {
    fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(snapshot_file_name(now));
    let bytes = to_pretty_json(document)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => OutputError::AlreadyExists { path: path.clone() },
            _ => OutputError::Io {
                path: path.clone(),
                source,
            },
        })?;

    file.write_all(&bytes)
        .and_then(|()| file.flush())
        .map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;

    info!(path = %path.display(), bytes = bytes.len(), "Snapshot saved");
    Ok(path)
}
