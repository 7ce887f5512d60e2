//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Measurement filtering, switch differencing, and the controller loop for NVC.

pub mod context;
pub mod controller;
pub mod emitter;
pub mod errors;
pub mod filter;
pub mod operator;

pub use context::ControllerContext;
pub use controller::{Controller, ControllerState, CycleReport, RunSummary};
pub use emitter::{DifferenceEmitter, SwitchCommandState, ToggleOutcome};
pub use errors::{ControllerError, Result};
pub use filter::{select_open_switches, select_voltage_nodes, ThresholdQuery};
pub use operator::{
    operator_channel, run_console, OperatorCommand, OperatorHandle, OperatorInbox,
    OperatorParseError, ToggleRequest,
};
