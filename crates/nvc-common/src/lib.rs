//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the controller runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the NVC workspace.
//! This crate exposes configuration loading, simulation request parsing,
//! and logging setup consumed by the daemon and its libraries.

pub mod config;
pub mod logging;
pub mod request;

pub use config::{
    AppConfig, BusConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, OperatorConfig,
    ThresholdSettings, TopologyConfig,
};
pub use logging::{init_tracing, LogFormat, TracingGuard};
pub use request::SimulationRequest;
