//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the controller and messaging layers.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the listener actually bound, with any ephemeral port resolved.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Per-cycle counters and gauges recorded by the switching controller.
#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    registry: SharedRegistry,
    messages_processed: IntCounter,
    messages_malformed: IntCounter,
    commands_published: IntCounter,
    toggle_noop: IntCounter,
    toggle_rejected: IntCounter,
    publish_failures: IntCounter,
    voltage_nodes_selected: IntGauge,
    open_switches: IntGauge,
}

impl ControllerMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let messages_processed = counter(
            &registry,
            "nvc_messages_processed_total",
            "Telemetry messages that completed a control cycle",
        )?;
        let messages_malformed = counter(
            &registry,
            "nvc_messages_malformed_total",
            "Telemetry messages discarded because they could not be decoded",
        )?;
        let commands_published = counter(
            &registry,
            "nvc_commands_published_total",
            "Switch difference commands published to the simulation",
        )?;
        let toggle_noop = counter(
            &registry,
            "nvc_toggle_noop_total",
            "Toggle requests matching the last commanded state",
        )?;
        let toggle_rejected = counter(
            &registry,
            "nvc_toggle_rejected_total",
            "Toggle requests naming a switch outside the roster",
        )?;
        let publish_failures = counter(
            &registry,
            "nvc_publish_failures_total",
            "Difference commands the transport failed to deliver",
        )?;
        let voltage_nodes_selected = gauge(
            &registry,
            "nvc_voltage_nodes_selected",
            "Buses inside the voltage window in the latest cycle",
        )?;
        let open_switches = gauge(
            &registry,
            "nvc_open_switches",
            "Switches reporting open in the latest cycle",
        )?;

        Ok(Self {
            registry,
            messages_processed,
            messages_malformed,
            commands_published,
            toggle_noop,
            toggle_rejected,
            publish_failures,
            voltage_nodes_selected,
            open_switches,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_processed(&self) {
        self.messages_processed.inc();
    }

    pub fn inc_malformed(&self) {
        self.messages_malformed.inc();
    }

    pub fn inc_published(&self) {
        self.commands_published.inc();
    }

    pub fn inc_toggle_noop(&self) {
        self.toggle_noop.inc();
    }

    pub fn inc_toggle_rejected(&self) {
        self.toggle_rejected.inc();
    }

    pub fn inc_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub fn set_cycle_sizes(&self, voltage_nodes: usize, open_switches: usize) {
        self.voltage_nodes_selected.set(voltage_nodes as i64);
        self.open_switches.set(open_switches as i64);
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

pub use prometheus;
