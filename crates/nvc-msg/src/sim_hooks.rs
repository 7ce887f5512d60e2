//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::types::RawTelemetry;
use crate::{MessagingError, Result};

/// One recorded telemetry payload and the pause preceding it.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    /// Delay to wait before delivering this payload.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Payload exactly as the bus delivered it: a JSON string or object.
    pub payload: JsonValue,
}

impl ReplayRecord {
    /// Delay before delivery, zero when unspecified.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.unwrap_or_default())
    }

    /// Convert the recorded payload into an inbound message.
    pub fn into_raw(self) -> RawTelemetry {
        RawTelemetry::from(self.payload)
    }
}

/// Read replay records from a newline-delimited JSON file.
///
/// Blank lines are skipped. A line that is not a valid record aborts the load
/// with its line number.
pub fn load_replay<P: AsRef<Path>>(path: P) -> Result<Vec<ReplayRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(&line).map_err(|err| {
            MessagingError::malformed(format!("replay line {}: {err}", index + 1))
        })?;
        records.push(record);
    }

    Ok(records)
}
