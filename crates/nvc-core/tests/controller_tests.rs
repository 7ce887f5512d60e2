//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Controller cycle and lifecycle integration tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nvc_core::{
    operator_channel, Controller, ControllerContext, ControllerError, ControllerState,
    OperatorHandle, ThresholdQuery, ToggleRequest,
};
use nvc_metrics::{new_registry, ControllerMetrics};
use nvc_msg::{
    InMemoryTransport, MessagingError, MessagingSupervisor, RawTelemetry, SwitchState, Transport,
};
use nvc_topology::{
    FixtureResolver, MeasurementIndex, Phase, QueryTimeouts, RawMeasurementRecord,
    ResolvedTopology, SwitchRoster,
};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::{broadcast, mpsc};

const SIMULATION_ID: &str = "1234";

fn pnv(measid: &str, phase: &str, bus: &str) -> RawMeasurementRecord {
    RawMeasurementRecord {
        measid: measid.into(),
        measurement_type: "PNV".into(),
        eqname: format!("line_{bus}"),
        eqid: None,
        eqtype: Some("ACLineSegment".into()),
        phases: Some(phase.into()),
        bus: Some(bus.into()),
    }
}

fn pos(measid: &str, eqname: &str, eqid: &str) -> RawMeasurementRecord {
    RawMeasurementRecord {
        measid: measid.into(),
        measurement_type: "Pos".into(),
        eqname: eqname.into(),
        eqid: Some(eqid.into()),
        eqtype: Some("LoadBreakSwitch".into()),
        phases: Some("A".into()),
        bus: None,
    }
}

fn topology() -> ResolvedTopology {
    let index = MeasurementIndex::build(vec![pnv("m1", "A", "N1")], vec![pos("p1", "sw1", "S1")])
        .expect("index");
    let roster = SwitchRoster::from_index(&index);
    ResolvedTopology { index, roster }
}

struct Harness {
    controller: Controller,
    operator: OperatorHandle,
    transport: Arc<InMemoryTransport>,
}

fn harness(threshold: Option<ThresholdQuery>) -> Harness {
    let transport = Arc::new(InMemoryTransport::new());
    let mut supervisor = MessagingSupervisor::new();
    supervisor.register_transport(transport.clone());
    let context = ControllerContext::new(SIMULATION_ID, Arc::new(supervisor));
    let (operator, inbox) = operator_channel(threshold, 8);
    Harness {
        controller: Controller::new(context, topology(), inbox),
        operator,
        transport,
    }
}

fn telemetry(value: Value) -> RawTelemetry {
    RawTelemetry::from(value)
}

#[test]
fn scenario_a_selects_bus_inside_window() {
    let query = ThresholdQuery::new(Phase::A, 2000.0, 4000.0).expect("query");
    let mut h = harness(Some(query));
    let report = h
        .controller
        .handle(&telemetry(json!({
            "timestamp": 1,
            "measurements": { "m1": { "magnitude": 3000.0 } }
        })))
        .expect("cycle");
    assert_eq!(report.voltage_nodes, HashSet::from(["N1".to_owned()]));
    assert_eq!(h.controller.state(), ControllerState::Ready);
}

#[test]
fn scenario_b_excludes_boundary_magnitude() {
    let query = ThresholdQuery::new(Phase::A, 3000.0, 4000.0).expect("query");
    let mut h = harness(Some(query));
    let report = h
        .controller
        .handle(&telemetry(json!({
            "timestamp": 1,
            "measurements": { "m1": { "magnitude": 3000.0 } }
        })))
        .expect("cycle");
    assert!(report.voltage_nodes.is_empty());
}

#[tokio::test]
async fn scenario_c_toggle_publishes_once() {
    let mut h = harness(None);
    let request = ToggleRequest {
        selector: 0,
        next_state: SwitchState::Zero,
    };
    h.operator.request_toggle(request).await.expect("queue");
    h.operator.request_toggle(request).await.expect("queue");

    let report = h
        .controller
        .handle(&telemetry(json!({ "timestamp": 7, "measurements": {} })))
        .expect("cycle");

    assert_eq!(report.published.len(), 1);
    assert_eq!(report.noops, vec!["S1".to_owned()]);
    let command = &report.published[0];
    assert_eq!(command.current_state, SwitchState::One);
    assert_eq!(command.next_state, SwitchState::Zero);

    assert_eq!(h.transport.len(), 1);
    let (topic, envelope) = h.transport.recv().expect("published");
    assert_eq!(topic, "/topic/goss.gridappsd.simulation.input.1234");
    assert_eq!(envelope["command"], "update");
    assert_eq!(envelope["input"]["simulation_id"], SIMULATION_ID);
    let message = &envelope["input"]["message"];
    assert_eq!(message["timestamp"], 7);
    assert_eq!(message["differences"][0]["mrid"], "S1");
    assert_eq!(message["differences"][0]["attribute"], "Switch.open");
    assert_eq!(message["reverse_differences"][0]["value"], 1);
    assert_eq!(message["forward_differences"][0]["value"], 0);
}

#[test]
fn scenario_d_malformed_message_does_not_stop_processing() {
    let query = ThresholdQuery::new(Phase::A, 2000.0, 4000.0).expect("query");
    let mut h = harness(Some(query));

    let err = h
        .controller
        .handle(&telemetry(json!({ "timestamp": 1 })))
        .expect_err("missing measurements");
    assert!(matches!(err, ControllerError::MalformedMessage(_)));
    assert_eq!(h.controller.state(), ControllerState::Ready);

    let report = h
        .controller
        .handle(&RawTelemetry::Text(
            r#"{"simulation_id":"1234","message":{"timestamp":2,"measurements":{"m1":{"magnitude":2500.0},"p1":{"value":0}}}}"#
                .to_owned(),
        ))
        .expect("well-formed message still processed");
    assert_eq!(report.timestamp, 2);
    assert_eq!(report.voltage_nodes, HashSet::from(["N1".to_owned()]));
    assert_eq!(report.open_switches, HashSet::from(["sw1".to_owned()]));
}

#[tokio::test]
async fn toggles_wait_for_a_decodable_message() {
    let mut h = harness(None);
    h.operator
        .request_toggle(ToggleRequest {
            selector: 0,
            next_state: SwitchState::One,
        })
        .await
        .expect("queue");

    assert!(h.controller.handle(&telemetry(json!("not json"))).is_err());
    assert!(h.transport.is_empty());

    let report = h
        .controller
        .handle(&telemetry(json!({ "timestamp": 3, "measurements": {} })))
        .expect("cycle");
    assert_eq!(report.published.len(), 1);
}

#[tokio::test]
async fn unknown_selector_is_reported_and_metered() {
    let registry = new_registry();
    let metrics = ControllerMetrics::new(registry.clone()).expect("metrics");
    let transport = Arc::new(InMemoryTransport::new());
    let mut supervisor = MessagingSupervisor::new();
    supervisor.register_transport(transport.clone());
    let context = ControllerContext::new(SIMULATION_ID, Arc::new(supervisor)).with_metrics(metrics);
    let (operator, inbox) = operator_channel(None, 8);
    let mut controller = Controller::new(context, topology(), inbox);

    operator
        .request_toggle(ToggleRequest {
            selector: 5,
            next_state: SwitchState::One,
        })
        .await
        .expect("queue");
    let report = controller
        .handle(&telemetry(json!({ "timestamp": 4, "measurements": {} })))
        .expect("cycle");

    assert!(matches!(
        report.toggle_errors.as_slice(),
        [ControllerError::UnknownSwitch {
            selector: 5,
            roster_len: 1
        }]
    ));
    assert!(transport.is_empty());
    let rejected = registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "nvc_toggle_rejected_total")
        .map(|family| family.get_metric()[0].get_counter().get_value());
    assert_eq!(rejected, Some(1.0));
}

struct FlakyTransport {
    failing: AtomicBool,
    delivered: InMemoryTransport,
}

impl Transport for FlakyTransport {
    fn send(&self, topic: &str, payload: &Value) -> nvc_msg::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MessagingError::Publish {
                transport: "flaky",
                reason: "broker unavailable".into(),
            });
        }
        self.delivered.send(topic, payload)
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn failed_publication_rolls_back_and_is_not_retried() {
    let transport = Arc::new(FlakyTransport {
        failing: AtomicBool::new(true),
        delivered: InMemoryTransport::new(),
    });
    let mut supervisor = MessagingSupervisor::new();
    supervisor.register_transport(transport.clone());
    let context = ControllerContext::new(SIMULATION_ID, Arc::new(supervisor));
    let (operator, inbox) = operator_channel(None, 8);
    let mut controller = Controller::new(context, topology(), inbox);
    let open = ToggleRequest {
        selector: 0,
        next_state: SwitchState::Zero,
    };

    operator.request_toggle(open).await.expect("queue");
    let report = controller
        .handle(&telemetry(json!({ "timestamp": 1, "measurements": {} })))
        .expect("cycle");
    assert!(report.published.is_empty());
    assert!(matches!(
        report.toggle_errors.as_slice(),
        [ControllerError::Publish { switch_mrid, .. }] if switch_mrid == "S1"
    ));
    assert_eq!(
        controller
            .emitter()
            .state("S1")
            .and_then(|s| s.last_commanded_state),
        None
    );

    let quiet = controller
        .handle(&telemetry(json!({ "timestamp": 2, "measurements": {} })))
        .expect("cycle");
    assert!(quiet.published.is_empty() && quiet.toggle_errors.is_empty());

    transport.failing.store(false, Ordering::SeqCst);
    operator.request_toggle(open).await.expect("queue");
    let report = controller
        .handle(&telemetry(json!({ "timestamp": 3, "measurements": {} })))
        .expect("cycle");
    assert_eq!(report.published.len(), 1);
    assert_eq!(transport.delivered.len(), 1);
}

#[tokio::test]
async fn delivery_on_any_transport_keeps_the_commanded_state() {
    let broken = Arc::new(FlakyTransport {
        failing: AtomicBool::new(true),
        delivered: InMemoryTransport::new(),
    });
    let healthy = Arc::new(InMemoryTransport::new());
    let mut supervisor = MessagingSupervisor::new();
    supervisor.register_transport(broken);
    supervisor.register_transport(healthy.clone());
    let context = ControllerContext::new(SIMULATION_ID, Arc::new(supervisor));
    let (operator, inbox) = operator_channel(None, 8);
    let mut controller = Controller::new(context, topology(), inbox);
    let open = ToggleRequest {
        selector: 0,
        next_state: SwitchState::Zero,
    };

    operator.request_toggle(open).await.expect("queue");
    let report = controller
        .handle(&telemetry(json!({ "timestamp": 1, "measurements": {} })))
        .expect("cycle");
    assert_eq!(report.published.len(), 1);
    assert!(report.toggle_errors.is_empty());
    assert_eq!(healthy.len(), 1);
    assert_eq!(
        controller
            .emitter()
            .state("S1")
            .and_then(|s| s.last_commanded_state),
        Some(SwitchState::Zero)
    );

    operator.request_toggle(open).await.expect("queue");
    let repeat = controller
        .handle(&telemetry(json!({ "timestamp": 2, "measurements": {} })))
        .expect("cycle");
    assert_eq!(repeat.noops, vec!["S1".to_owned()]);
    assert_eq!(healthy.len(), 1);
}

#[tokio::test]
async fn threshold_updates_apply_to_the_next_cycle() {
    let mut h = harness(None);
    let frame = json!({ "timestamp": 1, "measurements": { "m1": { "magnitude": 2400.0 } } });

    let report = h.controller.handle(&telemetry(frame.clone())).expect("cycle");
    assert!(report.threshold.is_none());
    assert!(report.voltage_nodes.is_empty());

    h.operator
        .apply("phase A 2000 2500".parse().expect("command"))
        .await
        .expect("apply");
    let report = h.controller.handle(&telemetry(frame.clone())).expect("cycle");
    assert_eq!(report.voltage_nodes.len(), 1);

    h.operator
        .apply("clear".parse().expect("command"))
        .await
        .expect("apply");
    let report = h.controller.handle(&telemetry(frame)).expect("cycle");
    assert!(report.voltage_nodes.is_empty());
}

fn write_fixtures(root: &std::path::Path) {
    std::fs::write(
        root.join("ACLineSegment.json"),
        json!({ "data": [
            { "measid": "_v1", "type": "PNV", "eqname": "650632", "phases": "B", "bus": "632" }
        ]})
        .to_string(),
    )
    .expect("ac lines");
    std::fs::write(
        root.join("LoadBreakSwitch.json"),
        json!({ "data": [
            { "measid": "_p1", "type": "Pos", "eqname": "671692", "eqid": "_S1", "phases": "A" }
        ]})
        .to_string(),
    )
    .expect("switches");
}

#[tokio::test]
async fn bootstrap_and_run_until_feed_closes() {
    let dir = tempdir().expect("tempdir");
    write_fixtures(dir.path());

    let transport = Arc::new(InMemoryTransport::new());
    let mut supervisor = MessagingSupervisor::new();
    supervisor.register_transport(transport.clone());
    let supervisor = Arc::new(supervisor);
    let context = ControllerContext::new(SIMULATION_ID, supervisor.clone());
    let query = ThresholdQuery::new(Phase::B, 2000.0, 3000.0).expect("query");
    let (operator, inbox) = operator_channel(Some(query), 8);

    let mut controller = Controller::bootstrap(
        context,
        inbox,
        &FixtureResolver::new(dir.path()),
        "_FDR",
        QueryTimeouts::default(),
    )
    .await
    .expect("bootstrap");
    assert_eq!(controller.state(), ControllerState::Ready);

    operator
        .request_toggle(ToggleRequest {
            selector: 0,
            next_state: SwitchState::Zero,
        })
        .await
        .expect("queue");

    let (tx, rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tx.send(telemetry(json!({ "timestamp": 1 }))).await.expect("send");
    tx.send(telemetry(json!({ "timestamp": 2, "measurements": { "_v1": { "magnitude": 2400.0 } } })))
        .await
        .expect("send");
    drop(tx);

    let summary = controller.run(rx, shutdown_rx).await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.malformed, 1);
    assert_eq!(controller.state(), ControllerState::Terminated);
    assert_eq!(transport.len(), 1);
    assert_eq!(supervisor.metrics().received, 2);
    assert_eq!(supervisor.metrics().sent, 1);
}

#[tokio::test]
async fn bootstrap_failure_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let context = ControllerContext::new(SIMULATION_ID, Arc::new(MessagingSupervisor::new()));
    let (_operator, inbox) = operator_channel(None, 1);
    let err = Controller::bootstrap(
        context,
        inbox,
        &FixtureResolver::new(dir.path()),
        "_FDR",
        QueryTimeouts::default(),
    )
    .await
    .expect_err("no fixtures");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn shutdown_signal_terminates_an_idle_controller() {
    let mut h = harness(None);
    let (_tx, rx) = mpsc::channel::<RawTelemetry>(1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shutdown_tx.send(());
    });
    let summary = tokio::time::timeout(Duration::from_secs(5), h.controller.run(rx, shutdown_rx))
        .await
        .expect("controller stops on shutdown");
    stopper.await.expect("stopper");

    assert_eq!(summary.processed, 0);
    assert_eq!(h.controller.state(), ControllerState::Terminated);
}
