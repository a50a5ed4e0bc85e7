//! The helpdesk service object.
//!
//! [`Helpdesk`] owns the RT session, the ticket cache, the sync job and the
//! analytics engine for the lifetime of the process. Reports first ask RT
//! which tickets fall in the requested window, then compute over the cached
//! copies of those tickets only.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheError, TicketCache};
use crate::config::Config;
use crate::credentials::Credentials;
use crate::rt::types::Ticket;
use crate::rt::{FetchError, SessionClient, TicketFetcher, TicketQueries};
use crate::stats::analytics::ResponseTime;
use crate::stats::{AnalyticsEngine, BusinessCalendar, ResponseReport, TouchCounts};
use crate::sync::{SyncError, SyncHandle, SyncJob};

pub struct Helpdesk {
  fetcher: TicketFetcher,
  cache: Arc<TicketCache>,
  queries: TicketQueries,
  sync: SyncJob,
  analytics: AnalyticsEngine,
}

impl Helpdesk {
  /// Log in to RT and open the cache. A failed login is fatal.
  pub async fn connect(config: &Config, credentials: Credentials) -> Result<Self> {
    let session = SessionClient::new(&config.rt.url, credentials)?;
    session
      .authenticate()
      .await
      .map_err(|e| eyre!("Failed to log in to RT at {}: {}", config.rt.url, e))?;

    let cache_dir = config.cache_dir()?;
    let cache = TicketCache::open(&cache_dir)
      .map_err(|e| eyre!("Failed to open ticket cache {}: {}", cache_dir.display(), e))?;
    info!(dir = %cache_dir.display(), "ticket cache ready");

    Self::new(config, Arc::new(session), Arc::new(cache))
  }

  fn new(config: &Config, session: Arc<SessionClient>, cache: Arc<TicketCache>) -> Result<Self> {
    let fetcher = TicketFetcher::new(session, config.tag_fields());
    let queries = config.queries()?;
    let sync = SyncJob::new(
      fetcher.clone(),
      Arc::clone(&cache),
      queries.clone(),
      config.sync_settings(),
    );
    let analytics = AnalyticsEngine::new(
      Arc::clone(&cache),
      BusinessCalendar::new(config.business_timezone()?),
      config.analytics_policy(),
    );

    Ok(Self {
      fetcher,
      cache,
      queries,
      sync,
      analytics,
    })
  }

  /// Live lookup of a ticket by user-supplied id.
  pub async fn ticket(&self, id: &str) -> Result<Ticket, FetchError> {
    self.fetcher.fetch(id).await
  }

  /// Fetch one ticket and overwrite its cache entry.
  pub async fn refresh_ticket(&self, id: &str) -> Result<Ticket> {
    let ticket = self.fetcher.fetch(id).await?;
    self.cache.put(&ticket)?;
    Ok(ticket)
  }

  pub fn cached_ticket(&self, id: u64) -> Result<Option<Ticket>, CacheError> {
    self.cache.get(id)
  }

  pub fn response_time(&self, ticket: &Ticket) -> Option<ResponseTime> {
    self.analytics.response_time(ticket)
  }

  pub fn start_sync(&self) -> Result<SyncHandle, SyncError> {
    self.sync.start()
  }

  pub fn sync_running(&self) -> bool {
    self.sync.is_running()
  }

  pub async fn pending_sync(&self) -> Result<usize, SyncError> {
    self.sync.pending().await
  }

  pub fn cached_count(&self) -> Result<usize, CacheError> {
    Ok(self.cache.ids()?.len())
  }

  pub fn last_synced(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
    self.cache.checkpoint()
  }

  /// Response statistics for tickets created in the last `days_ago` days.
  pub async fn average_response_report(
    &self,
    days_ago: u32,
  ) -> Result<Option<ResponseReport>, FetchError> {
    let ids = self
      .fetcher
      .search_ids(&self.queries.created_within(days_ago))
      .await?;
    Ok(self.analytics.average_response_report(&ids))
  }

  /// Touch counts for tickets updated in the last `days_ago` days.
  pub async fn ticket_touch_counts(
    &self,
    days_ago: u32,
    username: Option<&str>,
  ) -> Result<TouchCounts, FetchError> {
    let ids = self
      .fetcher
      .search_ids(&self.queries.updated_within(days_ago))
      .await?;
    Ok(self.analytics.ticket_touch_counts(&ids, username))
  }

  #[cfg(test)]
  pub(crate) fn cache(&self) -> &TicketCache {
    &self.cache
  }

  pub async fn untagged_blame(&self) -> Result<Option<BTreeMap<String, Vec<u64>>>, FetchError> {
    let ids = self
      .fetcher
      .search_ids(&self.queries.resolved_untagged())
      .await?;
    Ok(self.analytics.untagged_blame(&ids))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rt::api_types::samples;
  use crate::rt::types::fixtures::{correspond, event, ticket};
  use crate::rt::types::HistoryKind;
  use httpmock::prelude::*;

  fn credentials() -> Credentials {
    Credentials {
      username: "helpdesk".to_string(),
      password: "secret".to_string(),
    }
  }

  fn config(server: &MockServer, cache_dir: &std::path::Path) -> Config {
    let mut config = Config::parse(&format!(
      "rt:\n  url: {}\nanalytics:\n  timezone: UTC\n",
      server.url("/REST/1.0/")
    ))
    .unwrap();
    config.cache.dir = Some(cache_dir.to_path_buf());
    config
  }

  async fn mock_login(server: &MockServer) {
    server
      .mock_async(|when, then| {
        when.method(POST).path("/REST/1.0/");
        then.status(200).header("Set-Cookie", "RT_SID=abc; path=/");
      })
      .await;
  }

  #[tokio::test]
  async fn test_bad_credentials_fail_connect() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(POST).path("/REST/1.0/");
        then.status(302).header("Location", "/NoAuth/Login.html");
      })
      .await;

    let dir = tempfile::tempdir().unwrap();
    let result = Helpdesk::connect(&config(&server, dir.path()), credentials()).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_refresh_ticket_writes_cache() {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/REST/1.0/ticket/5/history");
        then.status(200).body(samples::HISTORY);
      })
      .await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/REST/1.0/ticket/5/show");
        then.status(200).body(samples::SHOW);
      })
      .await;

    let dir = tempfile::tempdir().unwrap();
    let helpdesk = Helpdesk::connect(&config(&server, dir.path()), credentials())
      .await
      .unwrap();

    assert!(helpdesk.cached_ticket(5).unwrap().is_none());
    let fetched = helpdesk.refresh_ticket("5").await.unwrap();
    assert_eq!(helpdesk.cached_ticket(5).unwrap(), Some(fetched.clone()));

    let response = helpdesk.response_time(&fetched).unwrap();
    assert_eq!(response.seconds, 7200.0);
    assert!(helpdesk.last_synced().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_malformed_id_is_rejected_locally() {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let helpdesk = Helpdesk::connect(&config(&server, dir.path()), credentials())
      .await
      .unwrap();

    assert!(matches!(
      helpdesk.ticket("abc").await,
      Err(FetchError::MalformedIdentifier(_))
    ));
  }

  #[tokio::test]
  async fn test_report_covers_searched_ids_from_cache() {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    let search = server
      .mock_async(|when, then| {
        when
          .method(GET)
          .path("/REST/1.0/search/ticket")
          .query_param("query", "Queue = 'uss-helpdesk' AND Created > 'now - 7 days'");
        // ticket 7 is not cached
        then.status(200).body(samples::SEARCH);
      })
      .await;

    let dir = tempfile::tempdir().unwrap();
    let helpdesk = Helpdesk::connect(&config(&server, dir.path()), credentials())
      .await
      .unwrap();
    helpdesk
      .cache
      .put(&ticket(
        5,
        "user1",
        vec![
          event(1, HistoryKind::Create, "user1", "2024-01-02 09:00:00"),
          correspond(2, "staff1", "2024-01-02 11:00:00"),
        ],
      ))
      .unwrap();

    let report = helpdesk.average_response_report(7).await.unwrap().unwrap();
    assert_eq!(report.average, 7200.0);
    assert_eq!(report.slowest.id, 5);
    assert_eq!(report.total_queried, 2);
    assert_eq!(report.no_response_count, 0);
    assert_eq!(search.hits_async().await, 1);
  }
}
