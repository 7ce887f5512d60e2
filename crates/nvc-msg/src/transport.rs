//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{MessagingError, Result};

/// Transport abstraction used for outbound publication.
pub trait Transport: Send + Sync {
    /// Hand a payload to the transport for delivery on `topic`.
    fn send(&self, topic: &str, payload: &JsonValue) -> Result<()>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// In-memory transport backed by a mutex protected queue.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    queue: Arc<Mutex<VecDeque<(String, JsonValue)>>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the oldest published `(topic, payload)` pair.
    pub fn recv(&self) -> Option<(String, JsonValue)> {
        self.queue.lock().pop_front()
    }

    /// Number of payloads waiting in the queue.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing has been published (or everything was drained).
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, topic: &str, payload: &JsonValue) -> Result<()> {
        self.queue
            .lock()
            .push_back((topic.to_owned(), payload.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    topic: &'a str,
    published_at: DateTime<Utc>,
    payload: &'a JsonValue,
}

/// Appends every published payload as one JSON document per line.
pub struct JsonLinesTransport {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesTransport {
    /// Write to an arbitrary sink.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Append to `path`, creating it when missing.
    pub fn to_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::new(Box::new(file)))
    }

    /// Write to the process stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Transport for JsonLinesTransport {
    fn send(&self, topic: &str, payload: &JsonValue) -> Result<()> {
        let line = serde_json::to_string(&JsonLine {
            topic,
            published_at: Utc::now(),
            payload,
        })?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|err| MessagingError::Publish {
                transport: self.name(),
                reason: err.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "json_lines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_transport_send_and_recv() {
        let transport = InMemoryTransport::new();
        transport
            .send("/topic/a", &json!({ "k": 1 }))
            .expect("send succeeds");
        assert_eq!(transport.len(), 1);
        let (topic, payload) = transport.recv().expect("message available");
        assert_eq!(topic, "/topic/a");
        assert_eq!(payload["k"], 1);
        assert!(transport.is_empty());
    }

    #[test]
    fn json_lines_transport_appends_documents() {
        let temp = tempfile::NamedTempFile::new().expect("temp file");
        let transport = JsonLinesTransport::to_file(temp.path()).expect("open");
        transport.send("/topic/a", &json!({ "n": 1 })).expect("send");
        transport.send("/topic/b", &json!({ "n": 2 })).expect("send");

        let contents = std::fs::read_to_string(temp.path()).expect("read back");
        let lines: Vec<JsonValue> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["topic"], "/topic/b");
        assert_eq!(lines[1]["payload"]["n"], 2);
    }
}
