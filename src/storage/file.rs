//! File-backed persistence
//!
//! Layout inside the data directory:
//!
//! ```text
//! counter.json    last issued ticket id
//! tickets.log     durable log, one JSON record per line
//! snapshot.json   full dump of the registry, tagged with the log sequence
//! ```
//!
//! Counter and snapshot are replaced atomically (write to a temp file, then
//! rename). Log appends are flushed to disk before returning.

use super::log::{LogRecord, parse_log};
use super::snapshot::Snapshot;
use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const COUNTER_FILE: &str = "counter.json";
const LOG_FILE: &str = "tickets.log";
const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterState {
    last_issued: u64,
}

/// Persistence rooted at one data directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Create a storage handle; nothing is touched until first use
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the data directory if needed
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .map_err(|e| StorageError::io(&self.base_dir, e))?;
        Ok(())
    }

    #[must_use]
    pub fn counter_path(&self) -> PathBuf {
        self.base_dir.join(COUNTER_FILE)
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.base_dir.join(LOG_FILE)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.base_dir.join(SNAPSHOT_FILE)
    }

    pub(crate) fn read_counter(&self) -> Result<u64> {
        let path = self.counter_path();
        Ok(read_json::<CounterState>(&path)?.map_or(0, |c| c.last_issued))
    }

    pub(crate) fn write_counter(&self, last_issued: u64) -> Result<()> {
        write_json_atomic(&self.counter_path(), &CounterState { last_issued })
    }

    pub(crate) fn read_log(&self) -> Result<Vec<LogRecord>> {
        let path = self.log_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&path, e).into()),
        };
        Ok(parse_log(&contents)?)
    }

    pub(crate) fn append_log(&self, record: &LogRecord) -> Result<()> {
        let path = self.log_path();
        let mut line =
            serde_json::to_string(record).map_err(|e| StorageError::json(&path, e))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(())
    }

    /// Cut a partially written final line so the next append starts clean
    ///
    /// Returns true when bytes were removed.
    pub(crate) fn truncate_torn_tail(&self) -> Result<bool> {
        let path = self.log_path();
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StorageError::io(&path, e).into()),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| StorageError::io(&path, e))?;
        if bytes.is_empty() || bytes.ends_with(b"\n") {
            return Ok(false);
        }

        let keep = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        file.set_len(keep as u64)
            .and_then(|()| file.sync_data())
            .map_err(|e| StorageError::io(&path, e))?;

        tracing::warn!(
            path = %path.display(),
            removed = bytes.len() - keep,
            "truncated torn durable log tail"
        );
        Ok(true)
    }

    pub(crate) fn read_snapshot(&self) -> Result<Option<Snapshot>> {
        read_json(&self.snapshot_path())
    }

    pub(crate) fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        write_json_atomic(&self.snapshot_path(), snapshot)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e).into()),
    };
    let value = serde_json::from_str(&contents).map_err(|e| StorageError::json(path, e))?;
    Ok(Some(value))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StorageError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");

    let mut file = File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
    file.write_all(&json)
        .and_then(|()| file.sync_data())
        .map_err(|e| StorageError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))?;
    Ok(())
}
