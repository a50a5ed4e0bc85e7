//! Repair of RT's pseudo-YAML output.
//!
//! RT's REST 1.0 interface answers with `Key: value` lines where continuation
//! lines of a multi-line value are indented. It looks like YAML but is not:
//! any value containing `:` or `#` (or starting with a YAML indicator) breaks a
//! YAML parser. The repair turns every top-level key line into a literal block
//! scalar with an explicit indentation indicator, so the value text and the
//! already-indented continuation lines are taken verbatim.
//!
//! History responses hold several records separated by `--`, a blank line and
//! a `# n/m (id/...)` header. [`split_records`] cuts them apart after repair.

use std::collections::BTreeMap;

use super::error::ParseError;

/// A parsed record: property name to trimmed value text.
pub type RawRecord = BTreeMap<String, String>;

/// Separator between history records; the `#` starts the next record header.
const RECORD_BOUNDARY: &str = "\n--\n\n#";

/// Lines dropped from the start of every split record (blank + header).
const RECORD_HEADER_LINES: usize = 2;

/// Drop the leading `RT/4.x.y 200 Ok` line if present.
pub fn strip_status_line(text: &str) -> &str {
  if text.starts_with("RT/") {
    match text.find('\n') {
      Some(pos) => &text[pos + 1..],
      None => "",
    }
  } else {
    text
  }
}

/// Rewrite top-level `Key: value` lines as block scalars.
///
/// Indented continuation lines, comment lines and blank lines pass through
/// unchanged.
pub fn repair(text: &str) -> String {
  let lines: Vec<&str> = text.lines().collect();
  let mut out = String::with_capacity(text.len() + text.len() / 4);

  for (i, line) in lines.iter().enumerate() {
    match split_key_line(line) {
      Some((key, value)) => {
        out.push_str(&quote_key(key));
        if value.is_empty() && !has_continuation(&lines[i + 1..]) {
          out.push_str(": \"\"");
        } else {
          out.push_str(": |1");
          if !value.is_empty() {
            out.push_str("\n ");
            out.push_str(value);
          }
        }
      }
      None => out.push_str(line),
    }
    out.push('\n');
  }

  out
}

/// Split repaired history text into records, dropping each record's header.
pub fn split_records(repaired: &str) -> Vec<String> {
  repaired
    .split(RECORD_BOUNDARY)
    .map(|block| {
      block
        .lines()
        .skip(RECORD_HEADER_LINES)
        .collect::<Vec<_>>()
        .join("\n")
    })
    .filter(|block| block.lines().any(|line| split_key_line(line).is_some()))
    .collect()
}

/// Parse one repaired record into a map of trimmed values.
pub fn parse_record(repaired: &str) -> Result<RawRecord, ParseError> {
  let raw: BTreeMap<String, String> = serde_yaml::from_str(repaired)?;
  Ok(
    raw
      .into_iter()
      .map(|(key, value)| (key, normalize_value(&value)))
      .collect(),
  )
}

/// Repair and parse a single-record response body (status line already removed).
pub fn parse_single(text: &str) -> Result<RawRecord, ParseError> {
  parse_record(&repair(text))
}

fn split_key_line(line: &str) -> Option<(&str, &str)> {
  if line.is_empty() || line.starts_with([' ', '\t', '#']) {
    return None;
  }
  let colon = key_separator(line)?;
  let (key, rest) = (&line[..colon], &line[colon + 1..]);
  Some((key, rest.strip_prefix(' ').unwrap_or(rest)))
}

/// First `:` outside braces, so custom-field names like `CF.{a: b}` stay whole.
fn key_separator(line: &str) -> Option<usize> {
  let mut depth = 0usize;
  for (i, c) in line.char_indices() {
    match c {
      '{' => depth += 1,
      '}' => depth = depth.saturating_sub(1),
      ':' if depth == 0 => return Some(i),
      _ => {}
    }
  }
  None
}

fn has_continuation(rest: &[&str]) -> bool {
  rest
    .iter()
    .find(|line| !line.trim().is_empty())
    .is_some_and(|line| line.starts_with(' '))
}

fn quote_key(key: &str) -> String {
  // A JSON string literal is a valid YAML double-quoted scalar.
  serde_json::to_string(key).unwrap_or_else(|_| format!("\"{}\"", key))
}

/// Trim the value and strip the common indentation of its continuation lines.
fn normalize_value(value: &str) -> String {
  let mut lines = value.lines();
  let first = lines.next().unwrap_or_default();
  let rest: Vec<&str> = lines.collect();

  let indent = rest
    .iter()
    .filter(|line| !line.trim().is_empty())
    .map(|line| leading_spaces(line))
    .min()
    .unwrap_or(0);

  let mut out = first.to_string();
  for line in rest {
    out.push('\n');
    out.push_str(&line[indent.min(leading_spaces(line))..]);
  }
  out
    .trim_matches(|c: char| c.is_ascii_whitespace())
    .to_string()
}

/// Indentation counts ASCII spaces only; other whitespace is value text.
fn leading_spaces(line: &str) -> usize {
  line.len() - line.trim_start_matches(' ').len()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_strip_status_line() {
    assert_eq!(strip_status_line("RT/4.4.3 200 Ok\n\nid: 1"), "\nid: 1");
    assert_eq!(strip_status_line("id: 1"), "id: 1");
  }

  #[test]
  fn test_colon_and_hash_in_value_survive() {
    let text = "Subject: Printer: broken # again\nStatus: open\n";
    let record = parse_single(text).unwrap();
    assert_eq!(record["Subject"], "Printer: broken # again");
    assert_eq!(record["Status"], "open");
  }

  #[test]
  fn test_yaml_indicators_at_value_start() {
    let text = "Subject: [URGENT] *help* & {braces} - | > !tag %x @user `tick`\n";
    let record = parse_single(text).unwrap();
    assert_eq!(
      record["Subject"],
      "[URGENT] *help* & {braces} - | > !tag %x @user `tick`"
    );
  }

  #[test]
  fn test_custom_field_keys_and_empty_values() {
    let text = "CF.{USS_Ticket_Category}: \nCF.{USS_Ticket_Subcategory}:\nQueue: uss-helpdesk\n";
    let record = parse_single(text).unwrap();
    assert_eq!(record["CF.{USS_Ticket_Category}"], "");
    assert_eq!(record["CF.{USS_Ticket_Subcategory}"], "");
    assert_eq!(record["Queue"], "uss-helpdesk");
  }

  #[test]
  fn test_multiline_value_keeps_continuation_lines() {
    let text = "Content: Hello: there\n         second # line\n\n           indented more\n\nCreator: user1\n";
    let record = parse_single(text).unwrap();
    assert_eq!(
      record["Content"],
      "Hello: there\nsecond # line\n\n  indented more"
    );
    assert_eq!(record["Creator"], "user1");
  }

  #[test]
  fn test_unicode_whitespace_is_not_indentation() {
    let text = "Content: first\n          indented\n         \u{a0}quoted reply\nCreator: x\n";
    let record = parse_single(text).unwrap();
    assert_eq!(record["Content"], "first\n indented\n\u{a0}quoted reply");
    assert_eq!(record["Creator"], "x");
  }

  #[test]
  fn test_colon_inside_custom_field_name() {
    let text = "CF.{Foo: Bar}: v: w\nQueue: uss-helpdesk\n";
    let record = parse_single(text).unwrap();
    assert_eq!(record["CF.{Foo: Bar}"], "v: w");
    assert_eq!(record["Queue"], "uss-helpdesk");
  }

  #[test]
  fn test_value_starting_on_continuation_line() {
    let text = "Content:\n         body text\nCreator: user1\n";
    let record = parse_single(text).unwrap();
    assert_eq!(record["Content"], "body text");
  }

  #[test]
  fn test_split_records_drops_headers() {
    let text = "\n# 2/2 (id/10/total)\n\nid: 10\nType: Create\n\n--\n\n# 2/2 (id/11/total)\n\nid: 11\nType: Correspond\n";
    let records: Vec<RawRecord> = split_records(&repair(text))
      .iter()
      .map(|r| parse_record(r).unwrap())
      .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["id"], "10");
    assert_eq!(records[1]["Type"], "Correspond");
  }

  #[test]
  fn test_separator_inside_content_is_not_a_boundary() {
    let text = "\n# 1/1 (id/10/total)\n\nid: 10\nContent: see below\n         --\n\n         # not a header\n";
    let records = split_records(&repair(text));
    assert_eq!(records.len(), 1);
    let record = parse_record(&records[0]).unwrap();
    assert_eq!(record["Content"], "see below\n--\n\n# not a header");
  }
}
