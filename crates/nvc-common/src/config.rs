//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the controller runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

const KNOWN_PHASES: [&str; 3] = ["A", "B", "C"];

fn default_fixture_dir() -> PathBuf {
    PathBuf::from("fixtures/ieee13")
}

fn default_measurement_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_graph_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_channel_capacity() -> usize {
    64
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the controller daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "NVC_CONFIG";

    /// Load configuration from disk, respecting the `NVC_CONFIG` override.
    ///
    /// An explicit `NVC_CONFIG` path must exist. Candidate paths are tried in
    /// order and the defaults are used when none of them exist.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.topology.validate()?;
        if self.bus.channel_capacity == 0 {
            return Err(anyhow!("bus.channel_capacity must be greater than zero"));
        }
        if let Some(threshold) = &self.operator.initial_threshold {
            threshold.validate()?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Where topology catalogs come from and how long the queries may take.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: PathBuf,
    #[serde(default = "default_measurement_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub measurement_timeout: Duration,
    #[serde(default = "default_graph_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub graph_timeout: Duration,
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.measurement_timeout.is_zero() || self.graph_timeout.is_zero() {
            return Err(anyhow!("topology query timeouts must be non-zero"));
        }
        Ok(())
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            fixture_dir: default_fixture_dir(),
            measurement_timeout: default_measurement_timeout(),
            graph_timeout: default_graph_timeout(),
        }
    }
}

/// Telemetry feed and command sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Newline-delimited telemetry replayed into the subscription.
    #[serde(default)]
    pub replay_file: Option<PathBuf>,
    /// Destination for published commands. Stdout when unset.
    #[serde(default)]
    pub command_log: Option<PathBuf>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            replay_file: None,
            command_log: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Threshold applied from the first message onwards.
    #[serde(default)]
    pub initial_threshold: Option<ThresholdSettings>,
    /// Read operator commands from stdin.
    #[serde(default)]
    pub interactive: bool,
}

/// Raw threshold as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSettings {
    pub phase: String,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
}

impl ThresholdSettings {
    pub fn validate(&self) -> Result<()> {
        let phase = self.phase.trim();
        if !KNOWN_PHASES.iter().any(|known| known.eq_ignore_ascii_case(phase)) {
            return Err(anyhow!(
                "operator.initial_threshold.phase must be one of A, B, C (got '{}')",
                self.phase
            ));
        }
        if !(self.min_magnitude < self.max_magnitude) {
            return Err(anyhow!(
                "operator.initial_threshold requires min_magnitude < max_magnitude ({} >= {})",
                self.min_magnitude,
                self.max_magnitude
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
