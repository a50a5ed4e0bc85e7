//! Statistics over cached tickets.
//!
//! Everything here reads from the [`TicketCache`] only. Callers decide which
//! ticket ids a report covers (usually from an RT search); ids that are not
//! cached are skipped and do not count towards averages.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use super::business::BusinessCalendar;
use crate::cache::TicketCache;
use crate::rt::types::{HistoryEvent, Ticket, TicketStatus};

/// Which unanswered tickets count against the helpdesk.
#[derive(Debug, Clone, Deserialize)]
pub struct NoResponsePolicy {
  /// Tickets in these statuses were closed without needing a reply
  #[serde(default = "default_exclude_statuses")]
  pub exclude_statuses: Vec<String>,
  /// Tickets opened by these accounts (automated helpers) are closed instantly
  #[serde(default = "default_exclude_creators")]
  pub exclude_creators: Vec<String>,
}

fn default_exclude_statuses() -> Vec<String> {
  vec!["resolved".to_string(), "rejected".to_string()]
}

fn default_exclude_creators() -> Vec<String> {
  vec!["qthelper".to_string()]
}

impl Default for NoResponsePolicy {
  fn default() -> Self {
    Self {
      exclude_statuses: default_exclude_statuses(),
      exclude_creators: default_exclude_creators(),
    }
  }
}

impl NoResponsePolicy {
  pub fn counts_as_unanswered(&self, ticket: &Ticket) -> bool {
    let excluded_status = self
      .exclude_statuses
      .iter()
      .any(|s| TicketStatus::from(s.as_str()) == ticket.status);
    let excluded_creator = self.exclude_creators.iter().any(|c| *c == ticket.creator);
    !excluded_status && !excluded_creator
  }
}

#[derive(Debug, Clone)]
pub struct AnalyticsPolicy {
  /// RT's internal account, never counted as a person
  pub system_account: String,
  pub no_response: NoResponsePolicy,
}

impl Default for AnalyticsPolicy {
  fn default() -> Self {
    Self {
      system_account: "RT_System".to_string(),
      no_response: NoResponsePolicy::default(),
    }
  }
}

/// Mean business-time response of one ticket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseTime {
  pub seconds: f64,
  pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TicketTiming {
  pub id: u64,
  pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseReport {
  /// Mean over tickets that received a response
  pub average: f64,
  pub slowest: TicketTiming,
  pub fastest: TicketTiming,
  pub no_response_count: usize,
  /// Every id the report was asked about, cached or not
  pub total_queried: usize,
  pub no_response_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchCounts {
  All(BTreeMap<String, usize>),
  User { username: String, count: usize },
}

pub struct AnalyticsEngine {
  cache: Arc<TicketCache>,
  calendar: BusinessCalendar,
  policy: AnalyticsPolicy,
}

impl AnalyticsEngine {
  pub fn new(cache: Arc<TicketCache>, calendar: BusinessCalendar, policy: AnalyticsPolicy) -> Self {
    Self {
      cache,
      calendar,
      policy,
    }
  }

  /// Average time for staff to answer the requester on one ticket.
  ///
  /// A staff correspondence before any from the requester is timed from
  /// ticket creation. After that, every requester correspondence directly
  /// followed by a staff one is timed between the two.
  pub fn response_time(&self, ticket: &Ticket) -> Option<ResponseTime> {
    let correspondences: Vec<&HistoryEvent> = ticket.correspondences().collect();
    let first = *correspondences.first()?;
    let from_requester = |h: &HistoryEvent| h.creator == ticket.requester;

    let mut samples = Vec::new();
    if !from_requester(first) {
      if let Some(created) = ticket.created_at() {
        samples.push(self.calendar.elapsed(created, first.created_at));
      }
    }

    for pair in correspondences.windows(2) {
      if from_requester(pair[0]) && !from_requester(pair[1]) {
        samples.push(self.calendar.elapsed(pair[0].created_at, pair[1].created_at));
      }
    }

    if samples.is_empty() {
      return None;
    }
    Some(ResponseTime {
      seconds: samples.iter().sum::<i64>() as f64 / samples.len() as f64,
      samples: samples.len(),
    })
  }

  /// Staff who acted on the ticket, in order of first appearance.
  ///
  /// The system account and external identities (anything with an `@`) are
  /// left out.
  pub fn touches(&self, ticket: &Ticket) -> Vec<String> {
    let mut seen = HashSet::new();
    ticket
      .histories
      .iter()
      .map(|h| h.creator.as_str())
      .filter(|actor| *actor != self.policy.system_account && !actor.contains('@'))
      .filter(|actor| seen.insert(*actor))
      .map(String::from)
      .collect()
  }

  /// Response statistics over the given tickets, or `None` if none of them
  /// received a response.
  pub fn average_response_report(&self, ids: &[u64]) -> Option<ResponseReport> {
    let mut total = 0.0;
    let mut answered = 0usize;
    let mut slowest: Option<TicketTiming> = None;
    let mut fastest: Option<TicketTiming> = None;
    let mut no_response_ids = Vec::new();

    for ticket in self.cached(ids) {
      let Some(response) = self.response_time(&ticket) else {
        if self.policy.no_response.counts_as_unanswered(&ticket) {
          no_response_ids.push(ticket.id);
        }
        continue;
      };

      let timing = TicketTiming {
        id: ticket.id,
        seconds: response.seconds,
      };
      if slowest.map_or(true, |s| timing.seconds > s.seconds) {
        slowest = Some(timing);
      }
      if fastest.map_or(true, |f| timing.seconds < f.seconds) {
        fastest = Some(timing);
      }
      total += response.seconds;
      answered += 1;
    }

    let (Some(slowest), Some(fastest)) = (slowest, fastest) else {
      return None;
    };
    Some(ResponseReport {
      average: total / answered as f64,
      slowest,
      fastest,
      no_response_count: no_response_ids.len(),
      total_queried: ids.len(),
      no_response_ids,
    })
  }

  /// How many of the given tickets each staff member touched.
  pub fn ticket_touch_counts(&self, ids: &[u64], username: Option<&str>) -> TouchCounts {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for ticket in self.cached(ids) {
      for actor in self.touches(&ticket) {
        *counts.entry(actor).or_default() += 1;
      }
    }

    match username {
      Some(username) => TouchCounts::User {
        username: username.to_string(),
        count: counts.get(username).copied().unwrap_or(0),
      },
      None => TouchCounts::All(counts),
    }
  }

  /// Who should have tagged each resolved, untagged ticket.
  ///
  /// The first staff member to correspond is blamed; without one, whoever
  /// resolved the ticket. Returns `None` when no cached ticket qualifies.
  pub fn untagged_blame(&self, ids: &[u64]) -> Option<BTreeMap<String, Vec<u64>>> {
    let mut qualifying = 0usize;
    let mut blame: BTreeMap<String, Vec<u64>> = BTreeMap::new();

    for ticket in self.cached(ids) {
      if ticket.status != TicketStatus::Resolved || !ticket.is_untagged() {
        continue;
      }
      qualifying += 1;

      let culprit = ticket
        .first_staff_correspondence()
        .or_else(|| ticket.resolves().next())
        .map(|h| h.creator.clone());
      if let Some(culprit) = culprit {
        blame.entry(culprit).or_default().push(ticket.id);
      }
    }

    (qualifying > 0).then_some(blame)
  }

  /// Cached tickets among `ids`, in order. Misses and unreadable entries are skipped.
  fn cached(&self, ids: &[u64]) -> Vec<Ticket> {
    ids
      .iter()
      .filter_map(|&id| match self.cache.get(id) {
        Ok(ticket) => ticket,
        Err(e) => {
          warn!(ticket = id, error = %e, "skipping unreadable cache entry");
          None
        }
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rt::types::fixtures::*;
  use crate::rt::types::HistoryKind;

  fn engine() -> (tempfile::TempDir, AnalyticsEngine) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(TicketCache::open(dir.path()).unwrap());
    let engine = AnalyticsEngine::new(
      cache,
      BusinessCalendar::new(chrono_tz::UTC),
      AnalyticsPolicy::default(),
    );
    (dir, engine)
  }

  fn create(creator: &str, created: &str) -> HistoryEvent {
    event(0, HistoryKind::Create, creator, created)
  }

  #[test]
  fn test_staff_first_reply_is_timed_from_creation() {
    let (_dir, engine) = engine();
    let t = ticket(
      1,
      "user1",
      vec![
        create("user1", "2024-01-02 09:00:00"),
        correspond(2, "staff1", "2024-01-02 11:00:00"),
      ],
    );
    assert_eq!(
      engine.response_time(&t),
      Some(ResponseTime {
        seconds: 7200.0,
        samples: 1
      })
    );
  }

  #[test]
  fn test_requester_then_staff_pairs_are_averaged() {
    let (_dir, engine) = engine();
    let t = ticket(
      1,
      "user1",
      vec![
        create("user1", "2024-01-02 09:00:00"),
        correspond(2, "user1", "2024-01-02 09:00:00"),
        correspond(3, "staff1", "2024-01-02 10:00:00"),
        correspond(4, "user1", "2024-01-02 12:00:00"),
        correspond(5, "user1", "2024-01-02 12:30:00"),
        correspond(6, "staff2", "2024-01-02 15:30:00"),
      ],
    );
    // 1h and 3h
    assert_eq!(
      engine.response_time(&t),
      Some(ResponseTime {
        seconds: 7200.0,
        samples: 2
      })
    );
  }

  #[test]
  fn test_no_response_cases() {
    let (_dir, engine) = engine();
    let silent = ticket(1, "user1", vec![create("user1", "2024-01-02 09:00:00")]);
    assert_eq!(engine.response_time(&silent), None);

    let only_requester = ticket(
      2,
      "user1",
      vec![
        create("user1", "2024-01-02 09:00:00"),
        correspond(2, "user1", "2024-01-02 09:10:00"),
      ],
    );
    assert_eq!(engine.response_time(&only_requester), None);
  }

  #[test]
  fn test_touches_filters_system_and_external() {
    let (_dir, engine) = engine();
    let t = ticket(
      1,
      "user1@pdx.edu",
      vec![
        correspond(1, "alice", "2024-01-02 09:00:00"),
        correspond(2, "RT_System", "2024-01-02 09:01:00"),
        correspond(3, "user1@pdx.edu", "2024-01-02 09:02:00"),
        correspond(4, "bob", "2024-01-02 09:03:00"),
        correspond(5, "alice", "2024-01-02 09:04:00"),
      ],
    );
    assert_eq!(engine.touches(&t), vec!["alice", "bob"]);
  }

  #[test]
  fn test_average_response_report() {
    let (_dir, engine) = engine();
    let fast = ticket(
      1,
      "user1",
      vec![
        create("user1", "2024-01-02 09:00:00"),
        correspond(2, "staff1", "2024-01-02 10:00:00"),
      ],
    );
    let slow = ticket(
      2,
      "user2",
      vec![
        create("user2", "2024-01-02 09:00:00"),
        correspond(2, "staff1", "2024-01-02 12:00:00"),
      ],
    );
    let mut unanswered = ticket(3, "user3", vec![create("user3", "2024-01-02 09:00:00")]);
    unanswered.status = TicketStatus::Open;
    let mut instant_close = ticket(4, "user4", vec![create("user4", "2024-01-02 09:00:00")]);
    instant_close.status = TicketStatus::Resolved;
    let mut helper = ticket(5, "user5", vec![create("qthelper", "2024-01-02 09:00:00")]);
    helper.creator = "qthelper".to_string();

    for t in [&fast, &slow, &unanswered, &instant_close, &helper] {
      engine.cache.put(t).unwrap();
    }

    // 99 is not cached
    let report = engine.average_response_report(&[1, 2, 3, 4, 5, 99]).unwrap();
    assert_eq!(report.average, 7200.0);
    assert_eq!(report.slowest, TicketTiming { id: 2, seconds: 10800.0 });
    assert_eq!(report.fastest, TicketTiming { id: 1, seconds: 3600.0 });
    assert_eq!(report.no_response_count, 1);
    assert_eq!(report.no_response_ids, vec![3]);
    assert_eq!(report.total_queried, 6);
  }

  #[test]
  fn test_empty_report_is_none() {
    let (_dir, engine) = engine();
    assert_eq!(engine.average_response_report(&[]), None);
    assert_eq!(engine.average_response_report(&[1, 2]), None);
  }

  #[test]
  fn test_ticket_touch_counts() {
    let (_dir, engine) = engine();
    engine
      .cache
      .put(&ticket(
        1,
        "user1",
        vec![
          correspond(1, "alice", "2024-01-02 09:00:00"),
          correspond(2, "alice", "2024-01-02 10:00:00"),
        ],
      ))
      .unwrap();
    engine
      .cache
      .put(&ticket(
        2,
        "user2",
        vec![
          correspond(1, "alice", "2024-01-02 09:00:00"),
          correspond(2, "bob", "2024-01-02 10:00:00"),
        ],
      ))
      .unwrap();

    let all = engine.ticket_touch_counts(&[1, 2, 3], None);
    let expected: BTreeMap<String, usize> =
      [("alice".to_string(), 2), ("bob".to_string(), 1)].into();
    assert_eq!(all, TouchCounts::All(expected));

    assert_eq!(
      engine.ticket_touch_counts(&[1, 2], Some("bob")),
      TouchCounts::User {
        username: "bob".to_string(),
        count: 1
      }
    );
    assert_eq!(
      engine.ticket_touch_counts(&[1, 2], Some("carol")),
      TouchCounts::User {
        username: "carol".to_string(),
        count: 0
      }
    );
  }

  #[test]
  fn test_untagged_blame() {
    let (_dir, engine) = engine();

    let mut resolved_only = ticket(
      1,
      "user1",
      vec![
        create("user1", "2024-01-02 09:00:00"),
        resolve(2, "staff2", "2024-01-02 10:00:00"),
      ],
    );
    resolved_only.status = TicketStatus::Resolved;
    resolved_only.category = None;
    resolved_only.subcategory = None;

    let mut answered = ticket(
      2,
      "user2",
      vec![
        create("user2", "2024-01-02 09:00:00"),
        correspond(2, "user2", "2024-01-02 09:05:00"),
        correspond(3, "staff1", "2024-01-02 09:30:00"),
        resolve(4, "staff2", "2024-01-02 10:00:00"),
      ],
    );
    answered.status = TicketStatus::Resolved;
    answered.subcategory = None;

    let mut tagged = ticket(3, "user3", vec![resolve(1, "staff3", "2024-01-02 10:00:00")]);
    tagged.status = TicketStatus::Resolved;

    for t in [&resolved_only, &answered, &tagged] {
      engine.cache.put(t).unwrap();
    }

    let blame = engine.untagged_blame(&[1, 2, 3]).unwrap();
    assert_eq!(blame.get("staff2"), Some(&vec![1]));
    assert_eq!(blame.get("staff1"), Some(&vec![2]));
    assert_eq!(blame.get("staff3"), None);

    assert_eq!(engine.untagged_blame(&[3]), None);
  }
}
