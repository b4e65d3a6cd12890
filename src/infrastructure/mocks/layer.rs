//! Log-capturing tracing layer for testing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::Layer;

/// Layer that records every event, so tests can assert on what was logged.
#[derive(Clone, Default)]
pub struct LogCapture {
    captured: Arc<Mutex<Vec<CapturedLog>>>,
}

/// One captured log event.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CapturedLog {
    pub level: Level,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl CapturedLog {
    /// Value of a structured field, formatted with `Debug`/`Display`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl LogCapture {
    /// Create a new capture layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured events.
    pub fn logs(&self) -> Vec<CapturedLog> {
        self.captured
            .lock()
            .expect("LogCapture mutex poisoned - a test thread panicked while holding the lock")
            .clone()
    }

    /// Captured events at `level` whose message contains `needle`.
    pub fn matching(&self, level: Level, needle: &str) -> Vec<CapturedLog> {
        self.logs()
            .into_iter()
            .filter(|log| log.level == level && log.message.contains(needle))
            .collect()
    }
}

impl<S> Layer<S> for LogCapture
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.captured
            .lock()
            .expect("LogCapture mutex poisoned - a test thread panicked while holding the lock")
            .push(CapturedLog {
                level: *event.metadata().level(),
                message: visitor.message,
                fields: visitor.fields,
            });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::warn;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_captures_message_and_fields() {
        let capture = LogCapture::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            warn!(campaign_id = 7, reason = "disk full", "Close deferred");
        });

        let logs = capture.matching(Level::WARN, "Close deferred");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].field("campaign_id"), Some("7"));
        assert_eq!(logs[0].field("reason"), Some("disk full"));
    }
}
