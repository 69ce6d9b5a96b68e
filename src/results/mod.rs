//! Durable, crash-safe persistence of per-step results.
//!
//! Every record is written to a temporary file, flushed, synced and then
//! renamed into place, so a crash leaves either no record or a complete one.

pub mod background;

pub use background::BackgroundWriter;

use crate::snapshot::{parse_record_file_name, ResultRecord};
use chrono::Utc;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Copy of the configuration inside a run directory
pub const CONFIG_FILE: &str = "config.yaml";

/// Run log inside a run directory
pub const LOG_FILE: &str = "run.log";

const PROBE_FILE: &str = ".write_probe.tmp";

const MAX_RUN_DIR_ATTEMPTS: u32 = 1000;

/// Errors raised by the results writer
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("output path {path} is not usable: {reason}")]
    OutputPath { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode record for step {step_index}: {source}")]
    Encode {
        step_index: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("a record for step {0} was already written")]
    Duplicate(u64),

    #[error("corrupt record {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("results writer is closed")]
    Closed,

    #[error("background writer failed: {0}")]
    Background(String),
}

/// What a sink did over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub written: u64,
    /// Records discarded under a drop policy
    pub dropped: u64,
}

/// Destination for result records
pub trait RecordSink {
    /// Persist one record. Returns `false` when an overflow policy
    /// discarded it instead.
    fn write(&mut self, record: ResultRecord) -> Result<bool, ResultsError>;

    /// Persist the last record of a run; never skipped.
    fn write_final(&mut self, record: ResultRecord) -> Result<(), ResultsError> {
        self.write(record).map(|_| ())
    }

    /// Flush and release resources. Calling it twice is harmless.
    fn close(&mut self) -> Result<SinkReport, ResultsError>;
}

/// Synchronous writer of one JSON file per step
#[derive(Debug)]
pub struct ResultsWriter {
    dir: PathBuf,
    indexed: BTreeSet<u64>,
    written: u64,
    closed: bool,
}

impl ResultsWriter {
    /// Open (creating if needed) a results directory.
    ///
    /// Fails with `OutputPath` when the path is a file or cannot be written.
    /// Records already present are indexed so they are never overwritten.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ResultsError> {
        let dir = dir.as_ref().to_path_buf();
        let unusable = |reason: String| ResultsError::OutputPath {
            path: dir.clone(),
            reason,
        };

        if dir.exists() && !dir.is_dir() {
            return Err(unusable("exists and is not a directory".to_string()));
        }
        fs::create_dir_all(&dir).map_err(|e| unusable(format!("cannot create: {}", e)))?;

        let probe = dir.join(PROBE_FILE);
        fs::write(&probe, b"probe")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| unusable(format!("not writable: {}", e)))?;

        let mut indexed = BTreeSet::new();
        let entries = fs::read_dir(&dir).map_err(|e| ResultsError::Io {
            path: dir.clone(),
            source: e,
        })?;
        for entry in entries.flatten() {
            if let Some(index) = entry.file_name().to_str().and_then(parse_record_file_name) {
                indexed.insert(index);
            }
        }
        if !indexed.is_empty() {
            debug!(
                "Results directory {} already holds {} records",
                dir.display(),
                indexed.len()
            );
        }

        Ok(Self {
            dir,
            indexed,
            written: 0,
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a record for `step_index` exists
    pub fn contains(&self, step_index: u64) -> bool {
        self.indexed.contains(&step_index)
    }

    fn report(&self) -> SinkReport {
        SinkReport {
            written: self.written,
            dropped: 0,
        }
    }
}

impl RecordSink for ResultsWriter {
    fn write(&mut self, record: ResultRecord) -> Result<bool, ResultsError> {
        if self.closed {
            return Err(ResultsError::Closed);
        }
        if self.indexed.contains(&record.step_index) {
            return Err(ResultsError::Duplicate(record.step_index));
        }

        let bytes = serde_json::to_vec_pretty(&record).map_err(|source| ResultsError::Encode {
            step_index: record.step_index,
            source,
        })?;
        let path = self.dir.join(record.file_name());
        write_atomic(&path, &bytes).map_err(|source| ResultsError::Io { path, source })?;

        self.indexed.insert(record.step_index);
        self.written += 1;
        Ok(true)
    }

    fn close(&mut self) -> Result<SinkReport, ResultsError> {
        if !self.closed {
            self.closed = true;
            debug!(
                "Results writer closed after {} records in {}",
                self.written,
                self.dir.display()
            );
        }
        Ok(self.report())
    }
}

impl Drop for ResultsWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close results writer: {}", e);
        }
    }
}

/// Write `bytes` to `path` through a temporary file and an atomic rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = dir.join(format!(".{}.tmp", name.to_string_lossy()));

    {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Read every record in `dir`, ordered by step index.
///
/// Temporary files are ignored. A record that does not parse, or whose index
/// disagrees with its file name, is reported as corrupt.
pub fn read_records<P: AsRef<Path>>(dir: P) -> Result<Vec<ResultRecord>, ResultsError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| ResultsError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let Some(index) = entry.file_name().to_str().and_then(parse_record_file_name) else {
            continue;
        };
        let path = entry.path();
        let bytes = fs::read(&path).map_err(|source| ResultsError::Io {
            path: path.clone(),
            source,
        })?;
        let record: ResultRecord =
            serde_json::from_slice(&bytes).map_err(|e| ResultsError::CorruptRecord {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if record.step_index != index {
            return Err(ResultsError::CorruptRecord {
                path,
                reason: format!("holds step {}", record.step_index),
            });
        }
        records.push(record);
    }

    records.sort_by_key(|r| r.step_index);
    Ok(records)
}

/// Run identifier: `YYYYmmdd_HHMMSS_seed<seed>`
pub fn run_id(seed: u64) -> String {
    format!("{}_seed{}", Utc::now().format("%Y%m%d_%H%M%S"), seed)
}

/// Create a fresh run directory under `root`, suffixing on collision
pub fn create_run_dir(root: &Path, run_id: &str) -> Result<PathBuf, ResultsError> {
    if root.exists() && !root.is_dir() {
        return Err(ResultsError::OutputPath {
            path: root.to_path_buf(),
            reason: "exists and is not a directory".to_string(),
        });
    }
    fs::create_dir_all(root).map_err(|e| ResultsError::OutputPath {
        path: root.to_path_buf(),
        reason: format!("cannot create: {}", e),
    })?;

    for attempt in 1..=MAX_RUN_DIR_ATTEMPTS {
        let name = if attempt == 1 {
            run_id.to_string()
        } else {
            format!("{}_{}", run_id, attempt)
        };
        let path = root.join(name);
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(ResultsError::OutputPath {
                    path,
                    reason: e.to_string(),
                })
            }
        }
    }

    Err(ResultsError::OutputPath {
        path: root.join(run_id),
        reason: format!("{} run directories with this id already exist", MAX_RUN_DIR_ATTEMPTS),
    })
}
