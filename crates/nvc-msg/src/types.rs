//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::{MessagingError, Result};

/// Attribute toggled by switch difference commands.
pub const SWITCH_OPEN_ATTRIBUTE: &str = "Switch.open";

/// Binary state carried by difference commands. Serialized as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SwitchState {
    /// Encoded as `0`.
    Zero,
    /// Encoded as `1`.
    One,
}

impl SwitchState {
    /// The opposite state; there is no third state.
    pub fn complement(self) -> Self {
        match self {
            SwitchState::Zero => SwitchState::One,
            SwitchState::One => SwitchState::Zero,
        }
    }

    /// Numeric encoding used on the wire.
    pub fn as_u8(self) -> u8 {
        u8::from(self)
    }
}

impl From<SwitchState> for u8 {
    fn from(value: SwitchState) -> Self {
        match value {
            SwitchState::Zero => 0,
            SwitchState::One => 1,
        }
    }
}

impl TryFrom<u8> for SwitchState {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SwitchState::Zero),
            1 => Ok(SwitchState::One),
            other => Err(format!("switch state must be 0 or 1, got {other}")),
        }
    }
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// One measurement reading inside a telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Measurement identifier; redundant with the map key when present.
    #[serde(default, alias = "measurement_id")]
    pub measurement_mrid: Option<String>,
    /// Discrete position code for switch measurements.
    #[serde(default)]
    pub value: Option<f64>,
    /// Continuous magnitude for analog measurements.
    #[serde(default)]
    pub magnitude: Option<f64>,
    /// Phase angle in degrees for analog measurements.
    #[serde(default)]
    pub angle: Option<f64>,
}

/// A decoded measurement frame from the simulation output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    /// Simulation time in seconds.
    pub timestamp: i64,
    /// Samples keyed by measurement identifier.
    pub measurements: HashMap<String, TelemetrySample>,
}

impl TelemetryMessage {
    /// Decode a payload, accepting both the bus envelope and the bare frame.
    pub fn decode(raw: &RawTelemetry) -> Result<Self> {
        let value = match raw {
            RawTelemetry::Text(text) => serde_json::from_str::<JsonValue>(text)
                .map_err(|err| MessagingError::malformed(format!("payload is not JSON: {err}")))?,
            RawTelemetry::Json(value) => value.clone(),
        };
        Self::from_value(value)
    }

    fn from_value(value: JsonValue) -> Result<Self> {
        let mut frame = match value {
            JsonValue::Object(mut object) => match object.remove("message") {
                Some(JsonValue::Object(inner)) => inner,
                Some(_) => return Err(MessagingError::malformed("`message` is not an object")),
                None => object,
            },
            _ => return Err(MessagingError::malformed("payload is not an object")),
        };

        let timestamp = frame
            .remove("timestamp")
            .ok_or_else(|| MessagingError::malformed("missing required field `timestamp`"))?;
        let measurements = frame
            .remove("measurements")
            .ok_or_else(|| MessagingError::malformed("missing required field `measurements`"))?;

        let timestamp = timestamp
            .as_i64()
            .ok_or_else(|| MessagingError::malformed("`timestamp` is not an integer"))?;
        let JsonValue::Object(entries) = measurements else {
            return Err(MessagingError::malformed("`measurements` is not an object"));
        };
        // An unreadable sample costs only that sample, not the frame.
        let measurements = entries
            .into_iter()
            .filter_map(|(measurement_id, sample)| {
                match serde_json::from_value::<TelemetrySample>(sample) {
                    Ok(sample) => Some((measurement_id, sample)),
                    Err(err) => {
                        warn!(timestamp, measurement_id = %measurement_id, error = %err, "skipping unreadable sample");
                        None
                    }
                }
            })
            .collect::<HashMap<_, _>>();

        Ok(Self {
            timestamp,
            measurements,
        })
    }

    /// Look up a sample by measurement identifier.
    pub fn sample(&self, measurement_id: &str) -> Option<&TelemetrySample> {
        self.measurements.get(measurement_id)
    }
}

/// Inbound payload as delivered by the bus, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTelemetry {
    /// Serialized JSON text.
    Text(String),
    /// Already decoded JSON document.
    Json(JsonValue),
}

impl From<String> for RawTelemetry {
    fn from(value: String) -> Self {
        RawTelemetry::Text(value)
    }
}

impl From<JsonValue> for RawTelemetry {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(text) => RawTelemetry::Text(text),
            other => RawTelemetry::Json(other),
        }
    }
}

/// Requested transition for a single switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceCommand {
    /// Switch mRID.
    #[serde(rename = "mrid")]
    pub switch_mrid: String,
    /// Attribute being changed.
    pub attribute: String,
    /// State the switch is expected to leave.
    pub current_state: SwitchState,
    /// State the switch is asked to enter.
    pub next_state: SwitchState,
}

impl DifferenceCommand {
    /// Build a `Switch.open` transition into `next_state` from its complement.
    pub fn toggle(switch_mrid: impl Into<String>, next_state: SwitchState) -> Self {
        Self {
            switch_mrid: switch_mrid.into(),
            attribute: SWITCH_OPEN_ATTRIBUTE.to_owned(),
            current_state: next_state.complement(),
            next_state,
        }
    }
}

/// Object/attribute/value triple inside a difference message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    /// Equipment mRID.
    pub object: String,
    /// Attribute name.
    pub attribute: String,
    /// Attribute value.
    pub value: SwitchState,
}

/// Forward/reverse difference pair understood by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceMessage {
    /// Simulation time the difference applies from.
    pub timestamp: i64,
    /// Unique identifier of this difference set.
    pub difference_mrid: Uuid,
    /// Values restoring the previous state.
    pub reverse_differences: Vec<Difference>,
    /// Values applying the requested state.
    pub forward_differences: Vec<Difference>,
    /// The originating commands.
    pub differences: Vec<DifferenceCommand>,
}

/// Body of the simulation input envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInputBody {
    /// Target simulation.
    pub simulation_id: String,
    /// Difference payload.
    pub message: DifferenceMessage,
}

/// Envelope published on the simulation input channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInput {
    /// Always `update` for difference commands.
    pub command: String,
    /// Envelope body.
    pub input: SimulationInputBody,
}

impl SimulationInput {
    /// Wrap one command in its own envelope.
    pub fn from_command(
        simulation_id: impl Into<String>,
        command: &DifferenceCommand,
        timestamp: i64,
    ) -> Self {
        let reverse = Difference {
            object: command.switch_mrid.clone(),
            attribute: command.attribute.clone(),
            value: command.current_state,
        };
        let forward = Difference {
            object: command.switch_mrid.clone(),
            attribute: command.attribute.clone(),
            value: command.next_state,
        };
        Self {
            command: "update".to_owned(),
            input: SimulationInputBody {
                simulation_id: simulation_id.into(),
                message: DifferenceMessage {
                    timestamp,
                    difference_mrid: Uuid::new_v4(),
                    reverse_differences: vec![reverse],
                    forward_differences: vec![forward],
                    differences: vec![command.clone()],
                },
            },
        }
    }
}
