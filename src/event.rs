use futures::future::LocalBoxFuture;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Application events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Input source connected, sent once before anything else
  Ready,
  /// One line of user input
  Message(String),
  /// Periodic tick for sync polling
  Tick,
  /// Input source closed
  Disconnected,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Ready => EventKind::Ready,
      Event::Message(_) => EventKind::Message,
      Event::Tick => EventKind::Tick,
      Event::Disconnected => EventKind::Disconnected,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Ready,
  Message,
  Tick,
  Disconnected,
}

/// A listener gets the receiving state and the event, and may produce a reply.
pub type Listener<C> = for<'a> fn(&'a mut C, &'a Event) -> LocalBoxFuture<'a, Option<String>>;

/// Listeners registered per event kind, run in registration order.
pub struct Listeners<C> {
  entries: Vec<(EventKind, Listener<C>)>,
}

impl<C> Listeners<C> {
  pub fn new() -> Self {
    Self {
      entries: Vec::new(),
    }
  }

  pub fn on(mut self, kind: EventKind, listener: Listener<C>) -> Self {
    self.entries.push((kind, listener));
    self
  }

  pub fn on_ready(self, listener: Listener<C>) -> Self {
    self.on(EventKind::Ready, listener)
  }

  pub fn on_message(self, listener: Listener<C>) -> Self {
    self.on(EventKind::Message, listener)
  }

  pub fn on_tick(self, listener: Listener<C>) -> Self {
    self.on(EventKind::Tick, listener)
  }

  pub fn on_disconnected(self, listener: Listener<C>) -> Self {
    self.on(EventKind::Disconnected, listener)
  }

  /// Run every listener for the event's kind and collect their replies.
  pub async fn dispatch(&self, ctx: &mut C, event: &Event) -> Vec<String> {
    let kind = event.kind();
    let mut replies = Vec::new();
    for (_, listener) in self.entries.iter().filter(|(k, _)| *k == kind) {
      if let Some(reply) = listener(&mut *ctx, event).await {
        replies.push(reply);
      }
    }
    replies
  }
}

impl<C> Default for Listeners<C> {
  fn default() -> Self {
    Self::new()
  }
}

/// Event handler that produces events from console input and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler reading stdin with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    Self::from_reader(tokio::io::stdin(), tick_rate)
  }

  pub fn from_reader<R>(reader: R, tick_rate: Duration) -> Self
  where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Event::Ready);

    // Spawn input reader
    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if input_tx.send(Event::Message(line)).is_err() {
              break;
            }
          }
          Ok(None) | Err(_) => {
            let _ = input_tx.send(Event::Disconnected);
            break;
          }
        }
      }
    });

    // Spawn ticker
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      loop {
        interval.tick().await;
        if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
