use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::cache::checkpoint;

/// Builds the TicketSQL queries used for syncing and reporting.
#[derive(Debug, Clone)]
pub struct TicketQueries {
  pub queue: String,
  pub category_field: String,
  pub subcategory_field: String,
  /// Earliest creation date considered by the untagged report
  pub untagged_since: String,
  /// Zone RT reads absolute TicketSQL dates in
  pub timezone: Tz,
}

impl TicketQueries {
  /// Tickets touched after the given sync checkpoint
  pub fn changed_since(&self, since: DateTime<Utc>) -> String {
    format!(
      "Queue = '{}' AND LastUpdated > '{}'",
      self.queue,
      checkpoint::format_in(since, self.timezone)
    )
  }

  pub fn created_within(&self, days_ago: u32) -> String {
    format!(
      "Queue = '{}' AND Created > 'now - {} days'",
      self.queue, days_ago
    )
  }

  pub fn updated_within(&self, days_ago: u32) -> String {
    format!(
      "Queue = '{}' AND LastUpdated > 'now - {} days'",
      self.queue, days_ago
    )
  }

  /// Resolved tickets missing either category tag
  pub fn resolved_untagged(&self) -> String {
    format!(
      "Created > '{}' AND Queue = '{}' AND Status = 'resolved' AND ( CF.{{{}}} IS NULL OR CF.{{{}}} IS NULL )",
      self.untagged_since, self.queue, self.category_field, self.subcategory_field
    )
  }
}
