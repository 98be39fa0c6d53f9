//! Real-time log fan-out
//!
//! A tracing layer that forwards formatted events into a broadcast
//! channel; WebSocket subscribers on `/ws/logs` drain it. Slow consumers
//! lag and drop, they never block logging.

use std::fmt::Write;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One log event as shipped to WS subscribers
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Tracing layer broadcasting formatted events
pub struct LogBroadcastLayer {
    tx: broadcast::Sender<String>,
}

impl LogBroadcastLayer {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for LogBroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Nobody listening: skip the formatting work
        if self.tx.receiver_count() == 0 {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let log = LogEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        };
        if let Ok(line) = serde_json::to_string(&log) {
            let _ = self.tx.send(line);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_events_reach_subscribers() {
        let (tx, mut rx) = broadcast::channel(16);
        let subscriber = tracing_subscriber::registry().with(LogBroadcastLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "briefwire::test", count = 3, "fetch complete");
        });

        let line = rx.try_recv().unwrap();
        let event: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(event["level"], "INFO");
        assert!(event["message"].as_str().unwrap().contains("fetch complete"));
        assert!(event["message"].as_str().unwrap().contains("count=3"));
    }

    #[test]
    fn test_no_subscribers_no_send() {
        let (tx, _) = broadcast::channel::<String>(16);
        let layer = LogBroadcastLayer::new(tx.clone());
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("dropped");
        });
        // With zero receivers the layer skipped sending entirely
        assert_eq!(tx.receiver_count(), 0);
    }
}
