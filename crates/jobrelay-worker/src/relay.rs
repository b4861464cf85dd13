//! Message relay carrying log entries from workers back to the controller.
//!
//! The channel is unbounded: a worker must never block on a slow
//! controller. The controller drains it without waiting, consuming only
//! what is already available.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A single log/progress line produced by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    /// The message text.
    pub text: String,
    /// Name of the worker that emitted it, when known.
    pub source: Option<String>,
    /// When the worker emitted it.
    pub timestamp: DateTime<Utc>,
}

impl MessageEntry {
    /// Create an entry stamped with the current time.
    pub fn new(text: impl Into<String>, source: Option<String>) -> Self {
        Self {
            text: text.into(),
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Write side of the relay, handed to workers before dispatch.
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<MessageEntry>,
}

impl RelaySender {
    /// Put an entry onto the relay. Fails only when the controller side
    /// has been dropped, handing the entry back.
    pub fn put(&self, entry: MessageEntry) -> Result<(), MessageEntry> {
        self.tx.send(entry).map_err(|e| e.0)
    }

    /// Whether the controller side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// FIFO relay owned by the controller.
#[derive(Debug)]
pub struct MessageRelay {
    tx: mpsc::UnboundedSender<MessageEntry>,
    rx: mpsc::UnboundedReceiver<MessageEntry>,
}

impl MessageRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A new write handle onto this relay.
    pub fn sender(&self) -> RelaySender {
        RelaySender {
            tx: self.tx.clone(),
        }
    }

    /// Whether nothing is waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Take the next entry if one is already available.
    pub fn try_next(&mut self) -> Option<MessageEntry> {
        self.rx.try_recv().ok()
    }

    /// Take every entry currently available, in receipt order.
    pub fn drain(&mut self) -> Vec<MessageEntry> {
        let mut entries = Vec::new();
        while let Some(entry) = self.try_next() {
            entries.push(entry);
        }
        entries
    }
}

impl Default for MessageRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination for entries flushed out of the relay.
pub trait MessageSink: Send + Sync {
    /// Deliver one entry.
    fn write(&self, entry: &MessageEntry);
}

/// Writes each flushed entry as an `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn write(&self, entry: &MessageEntry) {
        match &entry.source {
            Some(source) => tracing::info!(target: "jobrelay::relay", source = %source, "{}", entry.text),
            None => tracing::info!(target: "jobrelay::relay", "{}", entry.text),
        }
    }
}

impl<F> MessageSink for F
where
    F: Fn(&MessageEntry) + Send + Sync,
{
    fn write(&self, entry: &MessageEntry) {
        self(entry)
    }
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn MessageSink>;

/// The logging path a subtask writes through.
///
/// Unbound, or once the relay is gone, messages fall back to a local
/// `tracing` event instead of failing.
#[derive(Debug, Clone, Default)]
pub struct SubtaskLogger {
    source: Option<String>,
    sender: Option<RelaySender>,
}

impl SubtaskLogger {
    /// A logger not yet bound to any relay.
    pub fn unbound(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            sender: None,
        }
    }

    /// Point this logger at a relay.
    pub fn bind(&mut self, sender: RelaySender) {
        self.sender = Some(sender);
    }

    /// Whether messages currently go to a relay.
    pub fn is_bound(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Emit a message.
    pub fn log(&self, message: impl Into<String>) {
        let entry = MessageEntry::new(message, self.source.clone());
        let entry = match &self.sender {
            Some(sender) => match sender.put(entry) {
                Ok(()) => return,
                Err(entry) => entry,
            },
            None => entry,
        };
        tracing::info!(
            target: "jobrelay::relay",
            source = entry.source.as_deref().unwrap_or("-"),
            "{}",
            entry.text
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_drain_preserves_order() {
        let mut relay = MessageRelay::new();
        let sender = relay.sender();
        for i in 0..5 {
            sender
                .put(MessageEntry::new(format!("line {i}"), None))
                .expect("put");
        }

        let texts: Vec<String> = relay.drain().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
        assert!(relay.is_empty());
    }

    #[test]
    fn test_drain_empty_is_noop() {
        let mut relay = MessageRelay::new();
        assert!(relay.drain().is_empty());
        assert!(relay.drain().is_empty());
        assert!(relay.try_next().is_none());
    }

    #[test]
    fn test_unbound_logger_does_not_fail() {
        let logger = SubtaskLogger::unbound("orphan");
        assert!(!logger.is_bound());
        logger.log("nobody is listening");
    }

    #[test]
    fn test_bound_logger_tags_source() {
        let mut relay = MessageRelay::new();
        let mut logger = SubtaskLogger::unbound("copy");
        logger.bind(relay.sender());
        assert!(logger.is_bound());

        logger.log("copying");
        let entry = relay.try_next().expect("entry");
        assert_eq!(entry.text, "copying");
        assert_eq!(entry.source.as_deref(), Some("copy"));
    }

    #[test]
    fn test_logger_falls_back_after_relay_dropped() {
        let relay = MessageRelay::new();
        let mut logger = SubtaskLogger::unbound("late");
        logger.bind(relay.sender());
        drop(relay);

        assert!(!logger.is_bound());
        logger.log("still fine");
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |entry: &MessageEntry| {
            seen.lock().unwrap().push(entry.text.clone());
        };
        sink.write(&MessageEntry::new("hello", None));
        assert_eq!(seen.lock().unwrap().as_slice(), ["hello".to_string()]);
    }
}
