//! Background synchronization of the ticket cache.
//!
//! A sync run asks RT for every ticket updated since the cache checkpoint,
//! fetches each one and writes it to the cache. Per-ticket failures are
//! counted and appended to the cache's error log without stopping the run.
//! The checkpoint moves to the run's start time only after every ticket has
//! been processed.
//!
//! Runs execute on a tokio task. The control loop gets a [`SyncHandle`] and
//! calls [`SyncHandle::poll`] on each tick; polling never blocks.
//!
//! ```ignore
//! let mut handle = sync.start()?;
//!
//! // In event loop tick
//! if let Some(outcome) = handle.poll() {
//!     report(outcome);
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use futures::{stream, StreamExt};
use std::error::Error as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::cache::{checkpoint, CacheError, TicketCache};
use crate::rt::{FetchError, TicketFetcher, TicketQueries};

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("a cache sync is already running")]
  AlreadyRunning,
  #[error("failed to list changed tickets: {0}")]
  Query(#[from] FetchError),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error("sync task ended without reporting a result")]
  Aborted,
  #[error("sync result was already delivered")]
  ResultTaken,
}

/// Failure of a single ticket within a run. Never aborts the run.
#[derive(Debug, Error)]
pub enum TicketSyncError {
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// Outcome of one completed sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
  pub started_at: DateTime<Utc>,
  pub ticket_count: usize,
  pub error_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
  /// Tickets fetched at the same time within one run
  pub concurrency: usize,
  /// How far back the first run looks when there is no checkpoint yet
  pub initial_lookback: Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      concurrency: 4,
      initial_lookback: Duration::days(30),
    }
  }
}

/// Starts sync runs, allowing at most one at a time.
pub struct SyncJob {
  fetcher: TicketFetcher,
  cache: Arc<TicketCache>,
  queries: TicketQueries,
  settings: SyncSettings,
  running: Arc<AtomicBool>,
}

impl SyncJob {
  pub fn new(
    fetcher: TicketFetcher,
    cache: Arc<TicketCache>,
    queries: TicketQueries,
    settings: SyncSettings,
  ) -> Self {
    Self {
      fetcher,
      cache,
      queries,
      settings,
      running: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Spawn a sync run.
  ///
  /// Returns [`SyncError::AlreadyRunning`] instead of queueing when a run is
  /// still active. Must be called from within a tokio runtime.
  pub fn start(&self) -> Result<SyncHandle, SyncError> {
    if self
      .running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return Err(SyncError::AlreadyRunning);
    }
    let guard = RunningGuard(Arc::clone(&self.running));

    let run = SyncRun {
      fetcher: self.fetcher.clone(),
      cache: Arc::clone(&self.cache),
      queries: self.queries.clone(),
      settings: self.settings,
    };

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let outcome = run.execute().await;
      // Clear the flag first so a caller reacting to the result can start again.
      drop(guard);
      // Ignore send errors - the handle may have been dropped
      let _ = tx.send(outcome);
    });

    Ok(SyncHandle { receiver: Some(rx) })
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Number of tickets a sync started now would process.
  pub async fn pending(&self) -> Result<usize, SyncError> {
    let since = self.since(Utc::now())?;
    let ids = self
      .fetcher
      .search_ids(&self.queries.changed_since(since))
      .await?;
    Ok(ids.len())
  }

  fn since(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CacheError> {
    Ok(
      self
        .cache
        .checkpoint()?
        .unwrap_or(now - self.settings.initial_lookback),
    )
  }
}

/// Clears the running flag when the run ends, even by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Receives the result of one sync run, exactly once.
#[derive(Debug)]
pub struct SyncHandle {
  receiver: Option<oneshot::Receiver<Result<SyncReport, SyncError>>>,
}

impl SyncHandle {
  /// Check for the run's result without blocking.
  ///
  /// Returns `Some` once, when the result arrives; `None` before and after.
  pub fn poll(&mut self) -> Option<Result<SyncReport, SyncError>> {
    let receiver = self.receiver.as_mut()?;

    match receiver.try_recv() {
      Ok(outcome) => {
        self.receiver = None;
        Some(outcome)
      }
      Err(oneshot::error::TryRecvError::Empty) => None,
      Err(oneshot::error::TryRecvError::Closed) => {
        // Task ended without sending (panicked)
        self.receiver = None;
        Some(Err(SyncError::Aborted))
      }
    }
  }

  /// Wait for the result.
  pub async fn wait(mut self) -> Result<SyncReport, SyncError> {
    match self.receiver.take() {
      Some(rx) => rx.await.unwrap_or(Err(SyncError::Aborted)),
      None => Err(SyncError::ResultTaken),
    }
  }
}

struct SyncRun {
  fetcher: TicketFetcher,
  cache: Arc<TicketCache>,
  queries: TicketQueries,
  settings: SyncSettings,
}

impl SyncRun {
  async fn execute(self) -> Result<SyncReport, SyncError> {
    let started_at = Utc::now();
    let since = match self.cache.checkpoint()? {
      Some(ts) => ts,
      None => started_at - self.settings.initial_lookback,
    };

    let ids = self
      .fetcher
      .search_ids(&self.queries.changed_since(since))
      .await?;
    info!(
      count = ids.len(),
      since = %checkpoint::format(since),
      "syncing tickets"
    );

    let run = &self;
    let mut results = stream::iter(ids.iter().copied())
      .map(|id| async move { (id, run.sync_ticket(id).await) })
      .buffer_unordered(self.settings.concurrency.max(1));

    let mut error_count = 0;
    while let Some((id, result)) = results.next().await {
      if let Err(e) = result {
        error_count += 1;
        warn!(ticket = id, error = %e, "failed to sync ticket");
        if let Err(log_err) = self.cache.log_error(id, &error_chain(&e)) {
          error!(ticket = id, error = %log_err, "failed to write cache error log");
        }
      }
    }

    self.cache.advance_checkpoint(started_at)?;
    info!(
      tickets = ids.len(),
      errors = error_count,
      "sync complete"
    );

    Ok(SyncReport {
      started_at,
      ticket_count: ids.len(),
      error_count,
    })
  }

  async fn sync_ticket(&self, id: u64) -> Result<(), TicketSyncError> {
    let ticket = self.fetcher.fetch_ticket(id).await?;
    self.cache.put(&ticket)?;
    Ok(())
  }
}

fn error_chain(e: &TicketSyncError) -> String {
  let mut out = e.to_string();
  let mut source = e.source();
  while let Some(cause) = source {
    out.push_str("\ncaused by: ");
    out.push_str(&cause.to_string());
    source = cause.source();
  }
  out
}
