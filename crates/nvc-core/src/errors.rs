//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Controller error taxonomy."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use nvc_msg::MessagingError;
use nvc_topology::TopologyError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Failures surfaced by the controller.
///
/// Only [`ControllerError::Topology`] is fatal; every other variant affects a
/// single message or toggle request.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("malformed telemetry message: {0}")]
    MalformedMessage(#[source] MessagingError),
    #[error("unknown switch selector {selector} (roster has {roster_len} switches)")]
    UnknownSwitch { selector: usize, roster_len: usize },
    #[error("publishing command for switch {switch_mrid} failed: {source}")]
    Publish {
        switch_mrid: String,
        #[source]
        source: MessagingError,
    },
    #[error("invalid threshold: {reason}")]
    InvalidThreshold { reason: String },
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl ControllerError {
    /// True for the startup failure that must stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::Topology(_))
    }
}
