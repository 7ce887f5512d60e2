//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the NVC daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nvc_common::{init_tracing, AppConfig, BusConfig, SimulationRequest, ThresholdSettings};
use nvc_core::{
    operator_channel, run_console, Controller, ControllerContext, OperatorCommand, ThresholdQuery,
    ToggleRequest,
};
use nvc_metrics::{new_registry, spawn_http_server, ControllerMetrics};
use nvc_msg::{
    load_replay, log_message, JsonLinesTransport, MessageDirection, MessagingMetricsExporter,
    MessagingSupervisor, RawTelemetry, ReplayRecord,
};
use nvc_topology::{FixtureResolver, QueryTimeouts};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("NVC ", env!("CARGO_PKG_VERSION")),
    about = "Telemetry-reactive switching controller for a running grid simulation",
    long_about = None
)]
struct Cli {
    /// Simulation whose telemetry is consumed and whose switches are commanded.
    simulation_id: String,

    /// Serialized simulation request; `power_system_config.Line_name` selects the model.
    request: String,

    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory holding topology catalog fixtures")]
    fixtures: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Replay newline-delimited telemetry from FILE")]
    replay: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Append published commands to FILE instead of stdout")]
    command_log: Option<PathBuf>,

    #[arg(
        long,
        value_name = "A|B|C",
        requires_all = ["min_voltage", "max_voltage"],
        help = "Phase for voltage selection"
    )]
    phase: Option<String>,

    #[arg(long, value_name = "VOLTS", requires = "phase", allow_hyphen_values = true)]
    min_voltage: Option<f64>,

    #[arg(long, value_name = "VOLTS", requires = "phase", allow_hyphen_values = true)]
    max_voltage: Option<f64>,

    #[arg(
        long = "toggle",
        value_name = "SELECTOR=STATE",
        value_parser = parse_toggle,
        help = "Queue a switch toggle for the first cycle (repeatable)"
    )]
    toggles: Vec<ToggleRequest>,

    #[arg(long, help = "Read operator commands from stdin")]
    interactive: bool,
}

fn parse_toggle(arg: &str) -> std::result::Result<ToggleRequest, String> {
    let (selector, state) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected SELECTOR=STATE, got '{arg}'"))?;
    match format!("toggle {selector} {state}").parse::<OperatorCommand>() {
        Ok(OperatorCommand::Toggle(request)) => Ok(request),
        Ok(_) => Err(format!("'{arg}' is not a toggle")),
        Err(err) => Err(err.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/nvcd.toml"));
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    apply_overrides(&mut config, &cli);
    config
        .validate()
        .context("configuration invalid after command-line overrides")?;

    // Dropped last so shutdown and error lines reach stdout and the log file.
    let _tracing = init_tracing("nvcd", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running with defaults"),
    }

    let request = SimulationRequest::from_cli_arg(&cli.request)?;
    info!(simulation_id = %cli.simulation_id, model_id = %request.model_id, "simulation request parsed");

    run_daemon(config, cli, request).await
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(dir) = &cli.fixtures {
        config.topology.fixture_dir = dir.clone();
    }
    if let Some(path) = &cli.replay {
        config.bus.replay_file = Some(path.clone());
    }
    if let Some(path) = &cli.command_log {
        config.bus.command_log = Some(path.clone());
    }
    if let (Some(phase), Some(min), Some(max)) = (&cli.phase, cli.min_voltage, cli.max_voltage) {
        config.operator.initial_threshold = Some(ThresholdSettings {
            phase: phase.trim().to_ascii_uppercase(),
            min_magnitude: min,
            max_magnitude: max,
        });
    }
    if cli.interactive {
        config.operator.interactive = true;
    }
}

/// Load the configured replay up front so an unreadable feed fails the run.
fn load_feed(bus: &BusConfig) -> Result<Option<(PathBuf, Vec<ReplayRecord>)>> {
    let Some(path) = &bus.replay_file else {
        return Ok(None);
    };
    let records = load_replay(path)
        .with_context(|| format!("unable to load telemetry replay {}", path.display()))?;
    info!(replay = %path.display(), records = records.len(), "telemetry replay loaded");
    Ok(Some((path.clone(), records)))
}

async fn run_daemon(config: AppConfig, cli: Cli, request: SimulationRequest) -> Result<()> {
    let replay = load_feed(&config.bus).map_err(|err| {
        error!(error = %format!("{err:#}"), "telemetry feed unavailable");
        err
    })?;

    let registry = new_registry();
    let controller_metrics = ControllerMetrics::new(registry.clone())?;
    let messaging_exporter = MessagingMetricsExporter::register(&registry)?;

    let mut supervisor = MessagingSupervisor::new().with_exporter(messaging_exporter);
    match &config.bus.command_log {
        Some(path) => {
            info!(command_log = %path.display(), "publishing commands to file");
            supervisor.register_transport(Arc::new(JsonLinesTransport::to_file(path)?));
        }
        None => supervisor.register_transport(Arc::new(JsonLinesTransport::stdout())),
    }
    let supervisor = Arc::new(supervisor);

    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry.clone(), config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let initial_threshold = config
        .operator
        .initial_threshold
        .as_ref()
        .map(ThresholdQuery::try_from)
        .transpose()?;
    if cli.toggles.len() > config.bus.channel_capacity {
        bail!(
            "{} startup toggles exceed bus.channel_capacity {}",
            cli.toggles.len(),
            config.bus.channel_capacity
        );
    }
    let (operator, inbox) = operator_channel(initial_threshold, config.bus.channel_capacity);
    for toggle in &cli.toggles {
        operator
            .request_toggle(*toggle)
            .await
            .context("controller inbox closed before startup")?;
    }

    let context = ControllerContext::new(cli.simulation_id.clone(), supervisor.clone())
        .with_metrics(controller_metrics);
    let timeouts = QueryTimeouts {
        measurements: config.topology.measurement_timeout,
        graph: config.topology.graph_timeout,
    };
    let resolver = FixtureResolver::new(&config.topology.fixture_dir);
    let mut controller =
        match Controller::bootstrap(context, inbox, &resolver, &request.model_id, timeouts).await {
            Ok(controller) => controller,
            Err(err) => {
                error!(
                    model_id = %request.model_id,
                    fixture_dir = %config.topology.fixture_dir.display(),
                    error = %err,
                    "topology unavailable; not subscribing to telemetry"
                );
                if let Some(server) = metrics_server {
                    server.shutdown().await?;
                }
                return Err(err).context("controller bootstrap failed");
            }
        };
    info!(
        subscription = %controller.context().output_topic(),
        publication = %controller.context().input_topic(),
        "controller subscribed"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let (telemetry_tx, telemetry_rx) = mpsc::channel(config.bus.channel_capacity);

    // Held until shutdown so an idle controller keeps waiting for telemetry.
    let mut idle_feed = None;
    let feed_task = match replay {
        Some((path, records)) => Some(spawn_replay(
            path,
            records,
            controller.context().output_topic(),
            telemetry_tx,
            shutdown_tx.subscribe(),
        )),
        None => {
            warn!("no telemetry feed configured; controller will idle until shutdown");
            idle_feed = Some(telemetry_tx);
            None
        }
    };

    let console_task = if config.operator.interactive {
        info!("operator console reading stdin: phase <A|B|C> <min> <max> | toggle <selector> <0|1> | clear");
        let handle = operator.clone();
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(err) = run_console(BufReader::new(tokio::io::stdin()), handle, shutdown).await {
                warn!(error = %err, "operator console stopped");
            }
        }))
    } else {
        None
    };
    drop(operator);

    let controller_shutdown = shutdown_tx.subscribe();
    let mut controller_task = tokio::spawn(async move {
        let summary = controller.run(telemetry_rx, controller_shutdown).await;
        (controller, summary)
    });

    let (controller, summary) = tokio::select! {
        joined = &mut controller_task => joined.context("controller task panicked")?,
        interrupted = signal::ctrl_c() => {
            interrupted.context("failed to listen for ctrl-c")?;
            info!("ctrl-c received; shutting down");
            let _ = shutdown_tx.send(());
            controller_task.await.context("controller task panicked")?
        }
    };
    let _ = shutdown_tx.send(());
    drop(idle_feed);

    if let Some(task) = feed_task {
        if let Err(err) = task.await {
            warn!(error = %err, "telemetry feed task join error");
        }
    }
    if let Some(task) = console_task {
        // Stdin reads cannot be interrupted; do not wait for the next line.
        task.abort();
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    let messaging = supervisor.metrics();
    info!(
        state = ?controller.state(),
        processed = summary.processed,
        malformed = summary.malformed,
        sent = messaging.sent,
        received = messaging.received,
        dropped = messaging.dropped,
        "nvcd stopped"
    );
    Ok(())
}

fn spawn_replay(
    path: PathBuf,
    records: Vec<ReplayRecord>,
    topic: String,
    feed: mpsc::Sender<RawTelemetry>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(replay = %path.display(), records = records.len(), "replaying telemetry");
        for record in records {
            let delay = record.delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            log_message(MessageDirection::Inbound, &topic, &record.payload);
            if feed.send(record.into_raw()).await.is_err() {
                return;
            }
        }
        info!(replay = %path.display(), "telemetry replay finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(replay_file: Option<PathBuf>) -> BusConfig {
        BusConfig {
            replay_file,
            ..BusConfig::default()
        }
    }

    #[test]
    fn missing_replay_file_fails_the_run() {
        let missing = PathBuf::from("does/not/exist.ndjson");
        let err = load_feed(&bus(Some(missing))).expect_err("unreadable feed");
        assert!(format!("{err:#}").contains("unable to load telemetry replay does/not/exist.ndjson"));
    }

    #[test]
    fn bundled_replay_loads_before_startup() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/ieee13/replay.ndjson");
        let (loaded, records) = load_feed(&bus(Some(path.clone())))
            .expect("fixture loads")
            .expect("feed configured");
        assert_eq!(loaded, path);
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn no_replay_configured_means_no_feed() {
        assert!(load_feed(&bus(None)).expect("no feed").is_none());
    }
}
