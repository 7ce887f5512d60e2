//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology catalogs and measurement correlation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TopologyError>;

#[derive(Debug, Error)]
pub enum TopologyError {
    /// Nothing downstream can work without these catalogs.
    #[error("topology incomplete: no usable {}", missing.join(", no usable "))]
    Incomplete { missing: Vec<&'static str> },
    #[error("topology query for {object_type} failed: {reason}")]
    Query { object_type: String, reason: String },
    #[error("topology query for {what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
