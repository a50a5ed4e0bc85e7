use crate::cache::checkpoint;
use crate::commands::{self, Request};
use crate::event::{Event, EventHandler, Listeners};
use crate::helpdesk::Helpdesk;
use crate::rt::types::Ticket;
use crate::stats::TouchCounts;
use crate::sync::{SyncError, SyncHandle};
use color_eyre::{eyre::eyre, Result};
use futures::future::LocalBoxFuture;
use std::sync::Arc;
use tracing::{info, warn};

/// Main application state
pub struct App {
  helpdesk: Helpdesk,

  /// Handle of the sync run started from this session, polled every tick
  sync: Option<SyncHandle>,

  /// Start a sync as soon as the input source is ready
  sync_on_ready: bool,

  /// Whether to quit
  should_quit: bool,

  listeners: Arc<Listeners<App>>,
}

impl App {
  pub fn new(helpdesk: Helpdesk, sync_on_ready: bool) -> Self {
    Self {
      helpdesk,
      sync: None,
      sync_on_ready,
      should_quit: false,
      listeners: Arc::new(
        Listeners::new()
          .on_ready(on_ready)
          .on_message(on_message)
          .on_tick(on_tick)
          .on_disconnected(on_disconnected),
      ),
    }
  }

  pub async fn run(&mut self, mut events: EventHandler) -> Result<()> {
    while !self.should_quit {
      let Some(event) = events.next().await else {
        break;
      };
      if let Some(reply) = self.handle_event(event).await {
        println!("{}", reply);
      }
    }
    Ok(())
  }

  async fn handle_event(&mut self, event: Event) -> Option<String> {
    let listeners = Arc::clone(&self.listeners);
    let replies = listeners.dispatch(self, &event).await;
    (!replies.is_empty()).then(|| replies.join("\n"))
  }

  async fn handle_message(&mut self, line: &str) -> Option<String> {
    let request = match commands::parse(line) {
      Ok(Some(request)) => request,
      Ok(None) => return None,
      Err(e) => return Some(e.to_string()),
    };

    match self.dispatch(request).await {
      Ok(reply) => Some(reply),
      Err(e) => {
        warn!(command = line.trim(), error = %e, "command failed");
        Some(format!("Error: {}", e))
      }
    }
  }

  async fn dispatch(&mut self, request: Request) -> Result<String> {
    let reply = match request {
      Request::Ticket(id) => {
        let ticket = self.helpdesk.ticket(&id).await?;
        self.describe_ticket(&ticket)
      }
      Request::Refresh(id) => {
        let ticket = self.helpdesk.refresh_ticket(&id).await?;
        format!("Ticket {} refreshed", ticket.id)
      }
      Request::Response(id) => match self.helpdesk.cached_ticket(id)? {
        Some(ticket) => self.describe_response(&ticket),
        None => format!("Ticket {} is not cached, try: refresh {}", id, id),
      },
      Request::Sync => self.start_sync(),
      Request::Pending => {
        let count = self.helpdesk.pending_sync().await?;
        format!("{} tickets changed since the last sync", count)
      }
      Request::LastSync => {
        let mut reply = match self.helpdesk.last_synced()? {
          Some(ts) => format!("Cache last synced {} UTC", checkpoint::format(ts)),
          None => "Cache has never been synced".to_string(),
        };
        reply.push_str(&format!(" ({} tickets cached)", self.helpdesk.cached_count()?));
        if self.helpdesk.sync_running() {
          reply.push_str(", a sync is running now");
        }
        reply
      }
      Request::Average { days } => self.average_report(days).await?,
      Request::Touches { days, user } => {
        let counts = self
          .helpdesk
          .ticket_touch_counts(days, user.as_deref())
          .await?;
        format_touches(days, counts)
      }
      Request::Untagged => match self.helpdesk.untagged_blame().await? {
        None => "No resolved tickets are missing tags".to_string(),
        Some(blame) => blame
          .iter()
          .map(|(who, ids)| format!("{}: {}", who, join_ids(ids)))
          .collect::<Vec<_>>()
          .join("\n"),
      },
      Request::Test => "Helpdesk assemble!".to_string(),
      Request::Help => commands::help_text(),
      Request::Quit => {
        self.should_quit = true;
        "Bye".to_string()
      }
    };
    Ok(reply)
  }

  fn start_sync(&mut self) -> String {
    match self.helpdesk.start_sync() {
      Ok(handle) => {
        self.sync = Some(handle);
        "Cache sync started".to_string()
      }
      Err(SyncError::AlreadyRunning) => "A cache sync is already running".to_string(),
      Err(e) => format!("Error: {}", e),
    }
  }

  fn poll_sync(&mut self) -> Option<String> {
    let outcome = self.sync.as_mut()?.poll()?;
    self.sync = None;

    Some(match outcome {
      Ok(report) if report.error_count == 0 => {
        format!("Cache sync finished: {} tickets updated", report.ticket_count)
      }
      Ok(report) => format!(
        "Cache sync finished: {} tickets, {} failed (see error.log)",
        report.ticket_count, report.error_count
      ),
      Err(e) => format!("Cache sync failed: {}", e),
    })
  }

  fn describe_ticket(&self, ticket: &Ticket) -> String {
    let tag = |t: &Option<String>| t.clone().unwrap_or_else(|| "-".to_string());
    format!(
      "#{} [{}] {}\nrequester: {}  owner: {}  category: {}/{}\n{}",
      ticket.id,
      ticket.status,
      ticket.subject,
      ticket.requester,
      ticket.owner,
      tag(&ticket.category),
      tag(&ticket.subcategory),
      self.describe_response(ticket)
    )
  }

  fn describe_response(&self, ticket: &Ticket) -> String {
    match self.helpdesk.response_time(ticket) {
      Some(response) => format!(
        "response time: {} (mean of {} replies)",
        format_duration(response.seconds),
        response.samples
      ),
      None => "response time: no staff reply yet".to_string(),
    }
  }

  async fn average_report(&self, days: u32) -> Result<String> {
    let report = self
      .helpdesk
      .average_response_report(days)
      .await?
      .ok_or_else(|| eyre!("no answered tickets created in the last {} days", days))?;

    let mut lines = vec![
      format!(
        "Average response over the last {} days: {}",
        days,
        format_duration(report.average)
      ),
      format!(
        "Slowest: #{} ({})",
        report.slowest.id,
        format_duration(report.slowest.seconds)
      ),
      format!(
        "Fastest: #{} ({})",
        report.fastest.id,
        format_duration(report.fastest.seconds)
      ),
      format!(
        "No response: {} of {}",
        report.no_response_count, report.total_queried
      ),
    ];
    if !report.no_response_ids.is_empty() {
      lines.push(join_ids(&report.no_response_ids));
    }
    Ok(lines.join("\n"))
  }
}

fn on_ready<'a>(app: &'a mut App, _: &'a Event) -> LocalBoxFuture<'a, Option<String>> {
  Box::pin(async move {
    info!("console ready");
    if app.sync_on_ready {
      return Some(app.start_sync());
    }
    Some("rtstat ready, type help for commands".to_string())
  })
}

fn on_message<'a>(app: &'a mut App, event: &'a Event) -> LocalBoxFuture<'a, Option<String>> {
  Box::pin(async move {
    match event {
      Event::Message(line) => app.handle_message(line).await,
      _ => None,
    }
  })
}

fn on_tick<'a>(app: &'a mut App, _: &'a Event) -> LocalBoxFuture<'a, Option<String>> {
  Box::pin(async move { app.poll_sync() })
}

fn on_disconnected<'a>(app: &'a mut App, _: &'a Event) -> LocalBoxFuture<'a, Option<String>> {
  Box::pin(async move {
    app.should_quit = true;
    None
  })
}

fn format_touches(days: u32, counts: TouchCounts) -> String {
  match counts {
    TouchCounts::User { username, count } => {
      format!("{} touched {} tickets in the last {} days", username, count, days)
    }
    TouchCounts::All(counts) if counts.is_empty() => {
      format!("No tickets touched in the last {} days", days)
    }
    TouchCounts::All(counts) => {
      let mut counts: Vec<_> = counts.into_iter().collect();
      counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
      counts
        .iter()
        .map(|(who, count)| format!("{}: {}", who, count))
        .collect::<Vec<_>>()
        .join("\n")
    }
  }
}

fn join_ids(ids: &[u64]) -> String {
  ids
    .iter()
    .map(|id| format!("#{}", id))
    .collect::<Vec<_>>()
    .join(", ")
}

fn format_duration(seconds: f64) -> String {
  let total = seconds.round() as i64;
  let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
  if hours > 0 {
    format!("{}h {}m", hours, minutes)
  } else if minutes > 0 {
    format!("{}m {}s", minutes, secs)
  } else {
    format!("{}s", secs)
  }
}
