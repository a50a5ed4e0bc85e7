//! Available commands, argument parsing and autocomplete logic

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "ticket",
    aliases: &["t", "show"],
    usage: "ticket <id>",
    description: "Look up a ticket in RT",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: "refresh <id>",
    description: "Fetch a ticket and update its cache entry",
  },
  Command {
    name: "response",
    aliases: &["rt", "resp"],
    usage: "response <id>",
    description: "Business-time response of a cached ticket",
  },
  Command {
    name: "sync",
    aliases: &["s", "update"],
    usage: "sync",
    description: "Start a background cache sync",
  },
  Command {
    name: "pending",
    aliases: &["p"],
    usage: "pending",
    description: "Tickets changed since the last sync",
  },
  Command {
    name: "lastsync",
    aliases: &["ls", "last"],
    usage: "lastsync",
    description: "When the cache was last synced",
  },
  Command {
    name: "average",
    aliases: &["a", "avg"],
    usage: "average [days]",
    description: "Response statistics for recently created tickets",
  },
  Command {
    name: "touches",
    aliases: &["touch"],
    usage: "touches [days] [user]",
    description: "Tickets touched per staff member",
  },
  Command {
    name: "untagged",
    aliases: &["u", "blame"],
    usage: "untagged",
    description: "Who should have tagged resolved tickets",
  },
  Command {
    name: "test",
    aliases: &[],
    usage: "test",
    description: "Check that the bot is listening",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit rtstat",
  },
];

/// Window used by reports when no day count is given
pub const DEFAULT_DAYS: u32 = 7;

/// A parsed user request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
  Ticket(String),
  Refresh(String),
  Response(u64),
  Sync,
  Pending,
  LastSync,
  Average { days: u32 },
  Touches { days: u32, user: Option<String> },
  Untagged,
  Test,
  Help,
  Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
  #[error("unknown command '{input}'{}", did_you_mean(.suggestions))]
  Unknown {
    input: String,
    suggestions: Vec<&'static str>,
  },
  #[error("usage: {0}")]
  Usage(&'static str),
}

fn did_you_mean(suggestions: &[&str]) -> String {
  if suggestions.is_empty() {
    String::new()
  } else {
    format!(", did you mean: {}", suggestions.join(", "))
  }
}

/// Find a command by exact name or alias
pub fn lookup(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == word || cmd.aliases.contains(&word.as_str()))
}

/// Parse one line of input. Empty lines yield `Ok(None)`.
///
/// A leading `!` (chat-style commands) is accepted and ignored.
pub fn parse(line: &str) -> Result<Option<Request>, CommandError> {
  let line = line.trim();
  let line = line.strip_prefix('!').unwrap_or(line);
  let mut words = line.split_whitespace();
  let Some(word) = words.next() else {
    return Ok(None);
  };
  let args: Vec<&str> = words.collect();

  let Some(cmd) = lookup(word) else {
    return Err(CommandError::Unknown {
      input: word.to_string(),
      suggestions: get_suggestions(word).iter().map(|c| c.name).take(3).collect(),
    });
  };
  let usage = CommandError::Usage(cmd.usage);

  let request = match (cmd.name, args.as_slice()) {
    ("ticket", [id]) => Request::Ticket(id.to_string()),
    ("refresh", [id]) => Request::Refresh(id.to_string()),
    ("response", [id]) => Request::Response(id.parse().map_err(|_| usage)?),
    ("sync", []) => Request::Sync,
    ("pending", []) => Request::Pending,
    ("lastsync", []) => Request::LastSync,
    ("average", []) => Request::Average { days: DEFAULT_DAYS },
    ("average", [days]) => Request::Average {
      days: days.parse().map_err(|_| usage)?,
    },
    ("touches", rest) if rest.len() <= 2 => parse_touches(rest).ok_or(usage)?,
    ("untagged", []) => Request::Untagged,
    ("test", _) => Request::Test,
    ("help", _) => Request::Help,
    ("quit", _) => Request::Quit,
    _ => return Err(usage),
  };
  Ok(Some(request))
}

/// `touches`, `touches 14`, `touches alice` or `touches 14 alice`
fn parse_touches(args: &[&str]) -> Option<Request> {
  let (days, user): (u32, Option<String>) = match args {
    [] => (DEFAULT_DAYS, None),
    [one] => match one.parse() {
      Ok(days) => (days, None),
      Err(_) => (DEFAULT_DAYS, Some(one.to_string())),
    },
    [days, user] => (days.parse().ok()?, Some(user.to_string())),
    _ => return None,
  };
  Some(Request::Touches { days, user })
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// One line per command, for `help`
pub fn help_text() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("{:<24} {}", cmd.usage, cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}
