use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::api_types::{self, TagFields};
use super::error::FetchError;
use super::session::SessionClient;
use super::types::Ticket;

/// Fetches tickets and search results through an authenticated session.
#[derive(Clone)]
pub struct TicketFetcher {
  session: Arc<SessionClient>,
  tags: TagFields,
}

impl TicketFetcher {
  pub fn new(session: Arc<SessionClient>, tags: TagFields) -> Self {
    Self { session, tags }
  }

  /// Fetch a ticket by user-supplied id.
  pub async fn fetch(&self, id: &str) -> Result<Ticket, FetchError> {
    let number = id
      .trim()
      .parse::<u64>()
      .map_err(|_| FetchError::MalformedIdentifier(id.to_string()))?;
    self.fetch_ticket(number).await
  }

  /// Fetch a ticket's history and properties and assemble them.
  ///
  /// History comes first: its response carries RT's "not numeric" and "does
  /// not exist" signals, so properties are only requested for valid tickets.
  pub async fn fetch_ticket(&self, id: u64) -> Result<Ticket, FetchError> {
    debug!(ticket = id, "fetching ticket");

    let history_text = self
      .session
      .request(&self.url(&format!("ticket/{}/history?format=l", id))?)
      .await?;
    api_types::validate_history(&id.to_string(), &history_text)?;
    let histories = api_types::parse_histories(&history_text)
      .map_err(|source| FetchError::Parse { id, source })?;

    let show_text = self
      .session
      .request(&self.url(&format!("ticket/{}/show", id))?)
      .await?;
    let properties =
      api_types::parse_properties(&show_text).map_err(|source| FetchError::Parse { id, source })?;

    api_types::ticket_from_parts(properties, histories, &self.tags)
      .map_err(|source| FetchError::Parse { id, source })
  }

  /// Run a TicketSQL search and return matching ids, newest first.
  pub async fn search_ids(&self, query: &str) -> Result<Vec<u64>, FetchError> {
    let mut url = self.url("search/ticket")?;
    url
      .query_pairs_mut()
      .append_pair("query", query)
      .append_pair("orderby", "-created")
      .append_pair("format", "i");

    let text = self.session.request(&url).await?;
    let ids = api_types::parse_search_ids(&text);
    debug!(query, count = ids.len(), "search complete");
    Ok(ids)
  }

  fn url(&self, path: &str) -> Result<Url, FetchError> {
    Ok(self.session.base_url().join(path)?)
  }
}
