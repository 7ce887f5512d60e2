//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-run controller context."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use nvc_metrics::ControllerMetrics;
use nvc_msg::{simulation_input_topic, simulation_output_topic, MessagingSupervisor};

/// Everything a controller run shares with the outside world, created at startup.
#[derive(Debug, Clone)]
pub struct ControllerContext {
    simulation_id: String,
    supervisor: Arc<MessagingSupervisor>,
    metrics: Option<ControllerMetrics>,
}

impl ControllerContext {
    pub fn new(simulation_id: impl Into<String>, supervisor: Arc<MessagingSupervisor>) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            supervisor,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    /// Channel commands are published on.
    pub fn input_topic(&self) -> String {
        simulation_input_topic(&self.simulation_id)
    }

    /// Channel telemetry arrives on.
    pub fn output_topic(&self) -> String {
        simulation_output_topic(&self.simulation_id)
    }

    pub fn supervisor(&self) -> &MessagingSupervisor {
        &self.supervisor
    }

    pub fn metrics(&self) -> Option<&ControllerMetrics> {
        self.metrics.as_ref()
    }
}
