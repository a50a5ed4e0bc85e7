//! Conversion of repaired RT records into domain types.
//!
//! The REST endpoints answer with text, so "API types" here are the
//! [`RawRecord`] maps produced by the repair stage. This module knows which
//! keys RT uses and how its values are formatted.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::error::{FetchError, ParseError};
use super::repair::{self, RawRecord};
use super::types::{HistoryEvent, HistoryKind, Ticket, TicketStatus};

/// Timestamp format used by history records (always UTC)
const HISTORY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lines preceding the payload of search and show responses.
const RESPONSE_HEADER_LINES: usize = 2;

/// Names of the custom fields holding the ticket's category tags
#[derive(Debug, Clone)]
pub struct TagFields {
  pub category: String,
  pub subcategory: String,
}

impl TagFields {
  fn key(field: &str) -> String {
    format!("CF.{{{}}}", field)
  }
}

/// Check the validity signal RT puts on the third line of a history response.
pub fn validate_history(id: &str, text: &str) -> Result<(), FetchError> {
  let signal = text.lines().nth(2).unwrap_or_default().trim();

  if signal.starts_with("# Objects of type ticket must be specified by numeric id")
    || signal.starts_with("# Invalid object specification:")
  {
    return Err(FetchError::MalformedIdentifier(id.to_string()));
  }

  if let Some(number) = signal
    .strip_prefix("# Ticket ")
    .and_then(|rest| rest.strip_suffix(" does not exist."))
  {
    let number = number
      .parse::<u64>()
      .map_err(|_| FetchError::MalformedIdentifier(id.to_string()))?;
    return Err(FetchError::NotFound(number));
  }

  Ok(())
}

/// Parse the full text of a `history?format=l` response.
pub fn parse_histories(text: &str) -> Result<Vec<HistoryEvent>, ParseError> {
  let repaired = repair::repair(repair::strip_status_line(text));
  repair::split_records(&repaired)
    .iter()
    .map(|record| repair::parse_record(record).and_then(history_from_record))
    .collect()
}

/// Parse the full text of a `show` response.
pub fn parse_properties(text: &str) -> Result<RawRecord, ParseError> {
  let body = skip_lines(text, RESPONSE_HEADER_LINES);
  repair::parse_single(body)
}

/// Extract ticket ids from a `format=i` search response.
///
/// Each payload line looks like `ticket/12345`; lines without a trailing
/// number (such as `No matching results.`) are skipped.
pub fn parse_search_ids(text: &str) -> Vec<u64> {
  text
    .trim()
    .lines()
    .skip(RESPONSE_HEADER_LINES)
    .filter_map(|line| trailing_id(line.trim()))
    .collect()
}

/// Build a ticket from its properties and its already parsed histories.
pub fn ticket_from_parts(
  properties: RawRecord,
  histories: Vec<HistoryEvent>,
  tags: &TagFields,
) -> Result<Ticket, ParseError> {
  let raw_id = required(&properties, "id")?;
  let id = trailing_id(raw_id).ok_or_else(|| ParseError::Id(raw_id.to_string()))?;

  Ok(Ticket {
    id,
    subject: optional(&properties, "Subject").unwrap_or_default(),
    queue: optional(&properties, "Queue").unwrap_or_default(),
    status: TicketStatus::from(required(&properties, "Status")?),
    requester: required(&properties, "Requestors")?.to_string(),
    creator: required(&properties, "Creator")?.to_string(),
    owner: optional(&properties, "Owner").unwrap_or_default(),
    category: optional(&properties, &TagFields::key(&tags.category)),
    subcategory: optional(&properties, &TagFields::key(&tags.subcategory)),
    histories,
    properties,
  })
}

fn history_from_record(record: RawRecord) -> Result<HistoryEvent, ParseError> {
  let raw_id = required(&record, "id")?;
  let id = raw_id
    .parse::<u64>()
    .map_err(|_| ParseError::Id(raw_id.to_string()))?;

  let field = |key: &str| optional(&record, key).unwrap_or_default();
  let kind = match required(&record, "Type")? {
    "Create" => HistoryKind::Create,
    "Correspond" => HistoryKind::Correspond {
      content: field("Content"),
    },
    "Comment" => HistoryKind::Comment {
      content: field("Content"),
    },
    "Status" => HistoryKind::Status {
      old_value: field("OldValue"),
      new_value: field("NewValue"),
    },
    other => HistoryKind::Other {
      name: other.to_string(),
      field: field("Field"),
      old_value: field("OldValue"),
      new_value: field("NewValue"),
    },
  };

  Ok(HistoryEvent {
    id,
    kind,
    creator: required(&record, "Creator")?.to_string(),
    created_at: parse_timestamp(required(&record, "Created")?)?,
    description: field("Description"),
  })
}

/// Parse a history timestamp (`2024-01-02 09:00:00`, UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
  NaiveDateTime::parse_from_str(value.trim(), HISTORY_TIME_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|_| ParseError::Timestamp(value.to_string()))
}

fn required<'a>(record: &'a RawRecord, key: &'static str) -> Result<&'a str, ParseError> {
  record
    .get(key)
    .map(String::as_str)
    .ok_or(ParseError::MissingField(key))
}

fn optional(record: &RawRecord, key: &str) -> Option<String> {
  record
    .get(key)
    .filter(|value| !value.is_empty())
    .cloned()
}

fn trailing_id(value: &str) -> Option<u64> {
  value.rsplit('/').next()?.trim().parse().ok()
}

fn skip_lines(text: &str, count: usize) -> &str {
  let mut rest = text;
  for _ in 0..count {
    match rest.find('\n') {
      Some(pos) => rest = &rest[pos + 1..],
      None => return "",
    }
  }
  rest
}

#[cfg(test)]
pub(crate) mod samples {
  pub const HISTORY: &str = "RT/4.4.3 200 Ok

# 3/3 (id/100/total)

id: 100
Ticket: 5
TimeTaken: 0
Type: Create
Field:
OldValue:
NewValue:
Data:
Description: Ticket created by user1
Content: My printer: it says \"PC LOAD LETTER\" # help
         Thanks

Creator: user1
Created: 2024-01-02 09:00:00
Attachments:

--

# 3/3 (id/101/total)

id: 101
Ticket: 5
TimeTaken: 0
Type: Correspond
Field:
OldValue:
NewValue:
Data:
Description: Correspondence added by staff1
Content: Try this: load letter paper.

Creator: staff1
Created: 2024-01-02 11:00:00
Attachments:

--

# 3/3 (id/102/total)

id: 102
Ticket: 5
TimeTaken: 0
Type: Status
Field: Status
OldValue: open
NewValue: resolved
Data:
Description: Status changed from 'open' to 'resolved' by staff2
Content:
Creator: staff2
Created: 2024-01-03 08:00:00
Attachments:
";

  pub const SHOW: &str = "RT/4.4.3 200 Ok

id: ticket/5
Queue: uss-helpdesk
Owner: staff1
Creator: user1
Subject: Printer: PC LOAD LETTER # again
Status: resolved
Priority: 0
Requestors: user1
Cc:
Created: Tue Jan 02 09:00:00 2024
LastUpdated: Wed Jan 03 08:00:00 2024
CF.{USS_Ticket_Category}: Hardware
CF.{USS_Ticket_Subcategory}:
";

  pub const SEARCH: &str = "RT/4.4.3 200 Ok

ticket/7
ticket/5
";
}
