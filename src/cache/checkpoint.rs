//! Text encoding of the sync checkpoint stored in `last_updated`.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

use super::storage::CacheError;

/// Same shape RT accepts in TicketSQL date comparisons.
const CHECKPOINT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format(ts: DateTime<Utc>) -> String {
  ts.format(CHECKPOINT_FORMAT).to_string()
}

/// Render `ts` as wall-clock time in `tz`, the way RT reads dates in TicketSQL.
pub fn format_in(ts: DateTime<Utc>, tz: Tz) -> String {
  ts.with_timezone(&tz).format(CHECKPOINT_FORMAT).to_string()
}

pub fn parse(value: &str) -> Result<DateTime<Utc>, CacheError> {
  NaiveDateTime::parse_from_str(value.trim(), CHECKPOINT_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|_| CacheError::Checkpoint(value.to_string()))
}
