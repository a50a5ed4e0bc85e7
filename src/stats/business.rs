use chrono::{DateTime, Datelike, Days, Duration, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Elapsed-time arithmetic that skips weekends in the helpdesk's local time.
#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
  tz: Tz,
}

impl BusinessCalendar {
  pub fn new(tz: Tz) -> Self {
    Self { tz }
  }

  /// Seconds between `start` and `end`, with weekends left out.
  ///
  /// Both ends are converted to local time and moved to the next Monday
  /// 00:00 if they fall on a weekend. Two days are then removed for every
  /// full week in the span, and two more when `end`'s weekday comes before
  /// `start`'s. A span whose ends share a weekday but wrap into the next week
  /// (Monday 10:00 to the following Monday 09:00) gets no wrap correction.
  /// Returns 0 when `end` is not after `start`.
  pub fn elapsed(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let start = skip_weekend(start.with_timezone(&self.tz).naive_local());
    let end = skip_weekend(end.with_timezone(&self.tz).naive_local());
    if end <= start {
      return 0;
    }

    let mut delta = end - start;
    let weeks = delta.num_days() / 7;
    delta -= Duration::days(2 * weeks);

    if end.weekday().num_days_from_monday() < start.weekday().num_days_from_monday() {
      delta -= Duration::days(2);
    }

    delta.num_seconds()
  }
}

fn skip_weekend(local: NaiveDateTime) -> NaiveDateTime {
  let days = match local.weekday() {
    Weekday::Sat => 2,
    Weekday::Sun => 1,
    _ => return local,
  };
  NaiveDateTime::new(local.date() + Days::new(days), NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rt::types::fixtures::at;

  const HOUR: i64 = 3600;
  const DAY: i64 = 24 * HOUR;

  fn utc() -> BusinessCalendar {
    BusinessCalendar::new(chrono_tz::UTC)
  }

  #[test]
  fn test_same_instant_is_zero() {
    let t = at("2024-01-03 12:34:56");
    assert_eq!(utc().elapsed(t, t), 0);
  }

  #[test]
  fn test_same_day() {
    // Tuesday
    assert_eq!(
      utc().elapsed(at("2024-01-02 09:00:00"), at("2024-01-02 11:00:00")),
      2 * HOUR
    );
  }

  #[test]
  fn test_friday_evening_to_monday_morning() {
    assert_eq!(
      utc().elapsed(at("2024-01-05 17:00:00"), at("2024-01-08 09:00:00")),
      16 * HOUR
    );
  }

  #[test]
  fn test_weekend_start_moves_to_monday() {
    // Saturday 10:00 -> Monday 01:00
    assert_eq!(
      utc().elapsed(at("2024-01-06 10:00:00"), at("2024-01-08 01:00:00")),
      HOUR
    );
    // Both inside one weekend
    assert_eq!(
      utc().elapsed(at("2024-01-06 10:00:00"), at("2024-01-07 22:00:00")),
      0
    );
  }

  #[test]
  fn test_wrap_around_weekend() {
    // Thursday noon -> Tuesday noon: Thu, Fri, Mon
    assert_eq!(
      utc().elapsed(at("2024-01-04 12:00:00"), at("2024-01-09 12:00:00")),
      3 * DAY
    );
  }

  #[test]
  fn test_full_week_removes_two_days() {
    // Monday 09:00 -> the Tuesday after next week's Monday
    assert_eq!(
      utc().elapsed(at("2024-01-01 09:00:00"), at("2024-01-09 09:00:00")),
      6 * DAY
    );
  }

  #[test]
  fn test_weekends_are_taken_in_local_time() {
    let la = BusinessCalendar::new(chrono_tz::America::Los_Angeles);
    // 05:00Z Monday is Sunday 21:00 in Los Angeles; counting starts Monday 00:00 local.
    assert_eq!(
      la.elapsed(at("2024-01-08 05:00:00"), at("2024-01-08 17:00:00")),
      9 * HOUR
    );
  }

  #[test]
  fn test_monotonic_within_a_week() {
    let cal = utc();
    let start = at("2024-01-01 09:00:00");
    let mut previous = 0;
    for hour in 0..(4 * 24 + 14) {
      let end = start + Duration::hours(hour);
      let elapsed = cal.elapsed(start, end);
      assert!(elapsed >= previous, "decreased at +{}h", hour);
      previous = elapsed;
    }
  }
}
