//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wire types exchanged with the simulation bus and the transports that
//! carry them.

pub mod logging;
pub mod sim_hooks;
pub mod supervisor;
pub mod topics;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised while decoding, encoding, or moving messages.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Wrapper for IO errors encountered during messaging operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// An inbound payload did not carry the required structure.
    #[error("malformed message: {reason}")]
    Malformed {
        /// What was missing or wrong.
        reason: String,
    },
    /// A transport refused or failed to deliver a payload.
    #[error("publish via {transport} failed: {reason}")]
    Publish {
        /// Name of the failing transport.
        transport: &'static str,
        /// Transport-specific failure description.
        reason: String,
    },
}

impl MessagingError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

pub use logging::{log_message, MessageDirection, MessagingMetricsExporter};
pub use sim_hooks::{load_replay, ReplayRecord};
pub use supervisor::{MessagingMetrics, MessagingSupervisor};
pub use topics::{simulation_input_topic, simulation_output_topic};
pub use transport::{InMemoryTransport, JsonLinesTransport, Transport};
pub use types::{
    Difference, DifferenceCommand, DifferenceMessage, RawTelemetry, SimulationInput,
    SwitchState, TelemetryMessage, TelemetrySample, SWITCH_OPEN_ATTRIBUTE,
};
