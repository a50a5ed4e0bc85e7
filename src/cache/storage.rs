//! File-backed ticket cache.
//!
//! Layout of the cache directory:
//! - `<id>.json`: one serialized [`Ticket`] per file
//! - `last_updated`: the sync checkpoint
//! - `error.log`: append-only record of tickets that failed to sync

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::checkpoint;
use crate::rt::Ticket;

const CHECKPOINT_FILE: &str = "last_updated";
const ERROR_LOG_FILE: &str = "error.log";
const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache I/O on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("cache entry {path} is not a valid ticket: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("failed to serialize ticket {id}: {source}")]
  Serialize {
    id: u64,
    #[source]
    source: serde_json::Error,
  },
  #[error("invalid checkpoint '{0}'")]
  Checkpoint(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
  move |source| CacheError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// On-disk store of ticket snapshots plus the sync checkpoint and error log.
#[derive(Debug)]
pub struct TicketCache {
  dir: PathBuf,
}

impl TicketCache {
  /// Open (and create if needed) a cache directory.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn entry_path(&self, id: u64) -> PathBuf {
    self.dir.join(format!("{}.{}", id, ENTRY_EXTENSION))
  }

  /// Read a cached ticket. `Ok(None)` means the ticket was never cached.
  pub fn get(&self, id: u64) -> Result<Option<Ticket>, CacheError> {
    let path = self.entry_path(id);
    let data = match fs::read(&path) {
      Ok(data) => data,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_error(&path)(e)),
    };

    serde_json::from_slice(&data)
      .map(Some)
      .map_err(|source| CacheError::Corrupt { path, source })
  }

  /// Store a ticket, replacing any previous entry.
  ///
  /// The snapshot is written to a temporary file in the cache directory and
  /// renamed over the entry, so readers see either the old or the new ticket.
  pub fn put(&self, ticket: &Ticket) -> Result<(), CacheError> {
    let path = self.entry_path(ticket.id);
    let data = serde_json::to_vec_pretty(ticket).map_err(|source| CacheError::Serialize {
      id: ticket.id,
      source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_error(&self.dir))?;
    tmp.write_all(&data).map_err(io_error(tmp.path()))?;
    tmp
      .persist(&path)
      .map_err(|e| io_error(&path)(e.error))?;

    debug!(ticket = ticket.id, "cached ticket");
    Ok(())
  }

  /// Ids of every cached ticket, ascending.
  pub fn ids(&self) -> Result<Vec<u64>, CacheError> {
    let entries = fs::read_dir(&self.dir).map_err(io_error(&self.dir))?;
    let mut ids: Vec<u64> = entries
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.path())
      .filter(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
      .filter_map(|path| path.file_stem()?.to_str()?.parse().ok())
      .collect();
    ids.sort_unstable();
    Ok(ids)
  }

  /// Last sync boundary, or `None` if no sync has completed yet.
  pub fn checkpoint(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
    let path = self.dir.join(CHECKPOINT_FILE);
    match fs::read_to_string(&path) {
      Ok(text) => checkpoint::parse(&text).map(Some),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(io_error(&path)(e)),
    }
  }

  /// Move the checkpoint forward to `ts`.
  ///
  /// Returns `false` and leaves the file untouched when `ts` is older than the
  /// stored checkpoint.
  pub fn advance_checkpoint(&self, ts: DateTime<Utc>) -> Result<bool, CacheError> {
    if let Some(current) = self.checkpoint()? {
      if ts < current {
        return Ok(false);
      }
    }

    let path = self.dir.join(CHECKPOINT_FILE);
    let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_error(&self.dir))?;
    tmp
      .write_all(checkpoint::format(ts).as_bytes())
      .map_err(io_error(tmp.path()))?;
    tmp
      .persist(&path)
      .map_err(|e| io_error(&path)(e.error))?;
    Ok(true)
  }

  /// Append a failure record to `error.log`.
  pub fn log_error(&self, id: u64, detail: &str) -> Result<(), CacheError> {
    let path = self.dir.join(ERROR_LOG_FILE);
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .map_err(io_error(&path))?;

    let entry = format!(
      "{} Ticket: {}\n{}\n---------------------\n",
      checkpoint::format(Utc::now()),
      id,
      detail
    );
    file.write_all(entry.as_bytes()).map_err(io_error(&path))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rt::types::fixtures::{at, correspond, ticket};

  fn cache() -> (tempfile::TempDir, TicketCache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = TicketCache::open(dir.path().join("ticket_cache")).unwrap();
    (dir, cache)
  }

  #[test]
  fn test_miss_is_none() {
    let (_dir, cache) = cache();
    assert!(cache.get(42).unwrap().is_none());
  }

  #[test]
  fn test_put_then_get_replaces_entry() {
    let (_dir, cache) = cache();
    let mut t = ticket(42, "user1", vec![correspond(1, "staff1", "2024-01-02 11:00:00")]);
    cache.put(&t).unwrap();

    t.subject = "updated".to_string();
    cache.put(&t).unwrap();

    let cached = cache.get(42).unwrap().unwrap();
    assert_eq!(cached, t);
    assert_eq!(cache.ids().unwrap(), vec![42]);
    assert!(cache.dir().join("42.json").exists());
  }

  #[test]
  fn test_corrupt_entry_is_an_error() {
    let (_dir, cache) = cache();
    fs::write(cache.dir().join("7.json"), b"{not json").unwrap();
    assert!(matches!(cache.get(7), Err(CacheError::Corrupt { .. })));
  }

  #[test]
  fn test_checkpoint_never_moves_backward() {
    let (_dir, cache) = cache();
    assert_eq!(cache.checkpoint().unwrap(), None);

    assert!(cache.advance_checkpoint(at("2024-01-02 10:00:00")).unwrap());
    assert!(!cache.advance_checkpoint(at("2024-01-01 10:00:00")).unwrap());
    assert_eq!(
      cache.checkpoint().unwrap(),
      Some(at("2024-01-02 10:00:00"))
    );

    let text = fs::read_to_string(cache.dir().join("last_updated")).unwrap();
    assert_eq!(text, "2024-01-02 10:00:00");
  }

  #[test]
  fn test_error_log_appends() {
    let (_dir, cache) = cache();
    cache.log_error(5, "ticket 5 does not exist").unwrap();
    cache.log_error(6, "timeout").unwrap();

    let log = fs::read_to_string(cache.dir().join("error.log")).unwrap();
    assert!(log.contains("Ticket: 5\nticket 5 does not exist\n"));
    assert!(log.contains("Ticket: 6\ntimeout\n"));
    assert_eq!(log.matches("---------------------").count(), 2);
    assert_eq!(cache.ids().unwrap(), Vec::<u64>::new());
  }
}
