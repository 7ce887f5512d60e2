//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use nvc_msg::{DifferenceCommand, RawTelemetry, SimulationInput, TelemetryMessage};
use nvc_topology::{
    resolve_topology, MeasurementIndex, QueryTimeouts, ResolvedTopology, TopologyResolver,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::context::ControllerContext;
use crate::emitter::{DifferenceEmitter, ToggleOutcome};
use crate::errors::{ControllerError, Result};
use crate::filter::{select_open_switches, select_voltage_nodes, ThresholdQuery};
use crate::operator::{OperatorInbox, ToggleRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    AwaitingTopology,
    Ready,
    Processing,
    Terminated,
}

/// Outcome of one processed telemetry message.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub timestamp: i64,
    pub threshold: Option<ThresholdQuery>,
    pub voltage_nodes: HashSet<String>,
    pub open_switches: HashSet<String>,
    pub published: Vec<DifferenceCommand>,
    pub noops: Vec<String>,
    /// Rejected or undeliverable toggle requests.
    pub toggle_errors: Vec<ControllerError>,
}

/// Totals for a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub malformed: u64,
}

#[derive(Debug)]
pub struct Controller {
    context: ControllerContext,
    index: Arc<MeasurementIndex>,
    emitter: DifferenceEmitter,
    operator: OperatorInbox,
    state: ControllerState,
}

impl Controller {
    /// Resolve the topology and come up READY. Any failure is fatal to the run.
    pub async fn bootstrap<R>(
        context: ControllerContext,
        operator: OperatorInbox,
        resolver: &R,
        model_id: &str,
        timeouts: QueryTimeouts,
    ) -> Result<Self>
    where
        R: TopologyResolver + ?Sized,
    {
        info!(
            simulation_id = context.simulation_id(),
            model_id,
            state = ?ControllerState::AwaitingTopology,
            "resolving topology"
        );
        let topology = resolve_topology(resolver, model_id, timeouts)
            .await
            .map_err(|err| {
                error!(model_id, error = %err, "topology resolution failed");
                ControllerError::from(err)
            })?;
        Ok(Self::new(context, topology, operator))
    }

    pub fn new(context: ControllerContext, topology: ResolvedTopology, operator: OperatorInbox) -> Self {
        let ResolvedTopology { index, roster } = topology;
        for (selector, entry) in roster.iter().enumerate() {
            debug!(selector, name = %entry.name, switch_mrid = %entry.mrid, endpoints = ?entry.endpoints, "switch roster entry");
        }
        info!(
            simulation_id = context.simulation_id(),
            measurements = index.len(),
            switches = roster.len(),
            state = ?ControllerState::Ready,
            "controller ready"
        );
        Self {
            context,
            index: Arc::new(index),
            emitter: DifferenceEmitter::new(roster),
            operator,
            state: ControllerState::Ready,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn index(&self) -> Arc<MeasurementIndex> {
        self.index.clone()
    }

    pub fn emitter(&self) -> &DifferenceEmitter {
        &self.emitter
    }

    pub fn context(&self) -> &ControllerContext {
        &self.context
    }

    /// Run one PROCESSING cycle for `raw`.
    ///
    /// Only a decode failure is returned as an error. Toggle and publish
    /// failures are logged and collected in the report.
    pub fn handle(&mut self, raw: &RawTelemetry) -> Result<CycleReport> {
        self.state = ControllerState::Processing;
        let outcome = self.process(raw);
        self.state = ControllerState::Ready;
        outcome
    }

    fn process(&mut self, raw: &RawTelemetry) -> Result<CycleReport> {
        self.context.supervisor().observe_received();
        let message = TelemetryMessage::decode(raw).map_err(|err| {
            if let Some(metrics) = self.context.metrics() {
                metrics.inc_malformed();
            }
            warn!(error = %err, "dropping malformed telemetry message");
            ControllerError::MalformedMessage(err)
        })?;

        let threshold = self.operator.current_threshold();
        let voltage_nodes = threshold
            .map(|query| select_voltage_nodes(&self.index, &message, &query))
            .unwrap_or_default();
        let open_switches = select_open_switches(&self.index, &message);

        let mut report = CycleReport {
            timestamp: message.timestamp,
            threshold,
            voltage_nodes,
            open_switches,
            ..CycleReport::default()
        };

        for request in self.operator.drain_toggles() {
            self.apply_toggle(request, &mut report);
        }

        if let Some(metrics) = self.context.metrics() {
            metrics.inc_processed();
            metrics.set_cycle_sizes(report.voltage_nodes.len(), report.open_switches.len());
        }
        info!(
            timestamp = report.timestamp,
            open_switch_count = report.open_switches.len(),
            open_switches = ?sorted(&report.open_switches),
            threshold = ?report.threshold.map(|q| q.to_string()),
            voltage_nodes = ?sorted(&report.voltage_nodes),
            published = report.published.len(),
            "telemetry cycle complete"
        );
        Ok(report)
    }

    fn apply_toggle(&self, request: ToggleRequest, report: &mut CycleReport) {
        let timestamp = report.timestamp;
        match self.emitter.request_toggle(request.selector, request.next_state) {
            Ok(ToggleOutcome::Command { command, previous }) => {
                let envelope =
                    SimulationInput::from_command(self.context.simulation_id(), &command, timestamp);
                match self
                    .context
                    .supervisor()
                    .publish(&self.context.input_topic(), &envelope)
                {
                    Ok(()) => {
                        if let Some(metrics) = self.context.metrics() {
                            metrics.inc_published();
                        }
                        info!(
                            timestamp,
                            selector = request.selector,
                            switch_mrid = %command.switch_mrid,
                            current_state = %command.current_state,
                            next_state = %command.next_state,
                            "switch command published"
                        );
                        report.published.push(command);
                    }
                    Err(source) => {
                        self.emitter.rollback(&command, previous);
                        if let Some(metrics) = self.context.metrics() {
                            metrics.inc_publish_failure();
                        }
                        warn!(
                            timestamp,
                            selector = request.selector,
                            switch_mrid = %command.switch_mrid,
                            error = %source,
                            "switch command not delivered"
                        );
                        report.toggle_errors.push(ControllerError::Publish {
                            switch_mrid: command.switch_mrid,
                            source,
                        });
                    }
                }
            }
            Ok(ToggleOutcome::NoOp { switch_mrid }) => {
                if let Some(metrics) = self.context.metrics() {
                    metrics.inc_toggle_noop();
                }
                report.noops.push(switch_mrid);
            }
            Err(err) => {
                if let Some(metrics) = self.context.metrics() {
                    metrics.inc_toggle_rejected();
                }
                warn!(timestamp, selector = request.selector, error = %err, "toggle request rejected");
                report.toggle_errors.push(err);
            }
        }
    }

    /// Consume telemetry one message at a time until the feed closes or shutdown fires.
    ///
    /// A closed or lagged shutdown channel counts as a shutdown signal.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<RawTelemetry>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("shutdown requested; controller stopping");
                    break;
                }
                next = inbound.recv() => match next {
                    Some(raw) => match self.handle(&raw) {
                        Ok(_) => summary.processed += 1,
                        Err(_) => summary.malformed += 1,
                    },
                    None => {
                        info!("telemetry feed closed; controller stopping");
                        break;
                    }
                },
            }
        }
        self.state = ControllerState::Terminated;
        info!(
            processed = summary.processed,
            malformed = summary.malformed,
            state = ?self.state,
            "controller terminated"
        );
        summary
    }
}

fn sorted(set: &HashSet<String>) -> BTreeSet<&str> {
    set.iter().map(String::as_str).collect()
}
