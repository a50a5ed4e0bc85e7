use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ticket lifecycle status as reported by RT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketStatus {
  New,
  Open,
  Stalled,
  Resolved,
  Rejected,
  Deleted,
  Other(String),
}

impl TicketStatus {
  pub fn as_str(&self) -> &str {
    match self {
      TicketStatus::New => "new",
      TicketStatus::Open => "open",
      TicketStatus::Stalled => "stalled",
      TicketStatus::Resolved => "resolved",
      TicketStatus::Rejected => "rejected",
      TicketStatus::Deleted => "deleted",
      TicketStatus::Other(s) => s,
    }
  }
}

impl From<&str> for TicketStatus {
  fn from(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "new" => TicketStatus::New,
      "open" => TicketStatus::Open,
      "stalled" => TicketStatus::Stalled,
      "resolved" => TicketStatus::Resolved,
      "rejected" => TicketStatus::Rejected,
      "deleted" => TicketStatus::Deleted,
      _ => TicketStatus::Other(s.trim().to_string()),
    }
  }
}

impl From<String> for TicketStatus {
  fn from(s: String) -> Self {
    TicketStatus::from(s.as_str())
  }
}

impl From<TicketStatus> for String {
  fn from(status: TicketStatus) -> Self {
    status.as_str().to_string()
  }
}

impl std::fmt::Display for TicketStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What a history event records, with the fields that only make sense for that type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HistoryKind {
  Create,
  Correspond { content: String },
  Comment { content: String },
  Status { old_value: String, new_value: String },
  Other {
    name: String,
    field: String,
    old_value: String,
    new_value: String,
  },
}

/// One entry of a ticket's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
  pub id: u64,
  pub kind: HistoryKind,
  pub creator: String,
  /// Reported by RT in UTC
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub description: String,
}

impl HistoryEvent {
  pub fn is_correspondence(&self) -> bool {
    matches!(self.kind, HistoryKind::Correspond { .. })
  }

  /// True for a status change whose new value is `resolved`
  pub fn is_resolve(&self) -> bool {
    match &self.kind {
      HistoryKind::Status { new_value, .. } => {
        TicketStatus::from(new_value.as_str()) == TicketStatus::Resolved
      }
      _ => false,
    }
  }
}

/// A ticket with its full history, as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
  pub id: u64,
  #[serde(default)]
  pub subject: String,
  #[serde(default)]
  pub queue: String,
  pub status: TicketStatus,
  pub requester: String,
  pub creator: String,
  #[serde(default)]
  pub owner: String,
  pub category: Option<String>,
  pub subcategory: Option<String>,
  /// Ordered by occurrence, oldest first
  pub histories: Vec<HistoryEvent>,
  /// Every property the show endpoint returned, untyped
  #[serde(default)]
  pub properties: BTreeMap<String, String>,
}

impl Ticket {
  /// Creation time, taken from the first history event.
  pub fn created_at(&self) -> Option<DateTime<Utc>> {
    self.histories.first().map(|h| h.created_at)
  }

  pub fn correspondences(&self) -> impl Iterator<Item = &HistoryEvent> {
    self.histories.iter().filter(|h| h.is_correspondence())
  }

  pub fn resolves(&self) -> impl Iterator<Item = &HistoryEvent> {
    self.histories.iter().filter(|h| h.is_resolve())
  }

  /// First correspondence written by someone other than the requester
  pub fn first_staff_correspondence(&self) -> Option<&HistoryEvent> {
    self.correspondences().find(|h| h.creator != self.requester)
  }

  pub fn is_untagged(&self) -> bool {
    self.category.is_none() || self.subcategory.is_none()
  }
}


#[cfg(test)]
mod tests {
  use super::fixtures::*;
  use super::*;

  #[test]
  fn test_status_parsing_is_case_insensitive() {
    assert_eq!(TicketStatus::from("Resolved"), TicketStatus::Resolved);
    assert_eq!(
      TicketStatus::from("waiting"),
      TicketStatus::Other("waiting".to_string())
    );
  }

  #[test]
  fn test_status_serializes_as_plain_string() {
    let json = serde_json::to_string(&TicketStatus::Rejected).unwrap();
    assert_eq!(json, "\"rejected\"");
    let back: TicketStatus = serde_json::from_str("\"stalled\"").unwrap();
    assert_eq!(back, TicketStatus::Stalled);
  }

  #[test]
  fn test_first_staff_correspondence_skips_requester() {
    let t = ticket(
      1,
      "user1",
      vec![
        event(1, HistoryKind::Create, "user1", "2024-01-02 09:00:00"),
        correspond(2, "user1", "2024-01-02 09:05:00"),
        correspond(3, "staff1", "2024-01-02 10:00:00"),
      ],
    );
    assert_eq!(t.first_staff_correspondence().map(|h| h.id), Some(3));
    assert_eq!(t.created_at(), Some(at("2024-01-02 09:00:00")));
  }
}
