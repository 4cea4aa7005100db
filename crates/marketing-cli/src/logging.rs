use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Write as _};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// One captured event. Fields other than `message` are kept sorted by name.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl LogEntry {
    pub fn format_compact(&self) -> String {
        let mut line = format!(
            "{} {:<5} {} {}",
            self.timestamp, self.level, self.target, self.message
        );
        for (index, (name, value)) in self.fields.iter().enumerate() {
            let sep = if index == 0 { " | " } else { " " };
            let _ = write!(line, "{sep}{name}={value}");
        }
        line
    }

    fn is_problem(&self) -> bool {
        self.level <= Level::WARN && self.target.starts_with("marketing_")
    }
}

/// Ring buffer of the most recent events, shared with the layer that fills it.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Warnings and errors emitted by the sync crates, oldest first.
    pub fn problems(&self) -> Vec<LogEntry> {
        self.inner
            .lock()
            .map(|entries| entries.iter().filter(|e| e.is_problem()).cloned().collect())
            .unwrap_or_default()
    }

    fn push(&self, entry: LogEntry) {
        let Ok(mut entries) = self.inner.lock() else {
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        if self.capacity > 0 {
            entries.push_back(entry);
        }
    }
}

pub struct LogLayer {
    buffer: LogBuffer,
}

impl LogLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        let metadata = event.metadata();
        self.buffer.push(LogEntry {
            timestamp: clock_time(OffsetDateTime::now_utc()),
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: fields.message,
            fields: fields.rest,
        });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    rest: BTreeMap<String, String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.rest.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.rest.insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

fn clock_time(at: OffsetDateTime) -> String {
    at.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
