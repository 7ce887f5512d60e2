//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator directives delivered to the controller asynchronously."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Operator input never blocks message processing. Thresholds travel on a
//! `watch` channel (latest wins) and toggle requests on an `mpsc` queue the
//! controller drains at the start of each cycle.

use std::str::FromStr;

use nvc_msg::SwitchState;
use nvc_topology::Phase;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::ControllerError;
use crate::filter::ThresholdQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleRequest {
    /// Position in the switch roster.
    pub selector: usize,
    pub next_state: SwitchState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    /// `phase <A|B|C> <min> <max>`
    Threshold(ThresholdQuery),
    /// `toggle <selector> <0|1>`
    Toggle(ToggleRequest),
    /// `clear`: stop voltage selection until a new threshold arrives.
    Clear,
}

#[derive(Debug, Error)]
pub enum OperatorParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (expected phase, toggle or clear)")]
    UnknownVerb(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error(transparent)]
    Threshold(#[from] ControllerError),
}

const PHASE_USAGE: &str = "phase <A|B|C> <min> <max>";
const TOGGLE_USAGE: &str = "toggle <selector> <0|1>";

impl FromStr for OperatorCommand {
    type Err = OperatorParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(OperatorParseError::Empty)?;
        let args: Vec<&str> = words.collect();
        match verb.to_ascii_lowercase().as_str() {
            "phase" => {
                let [phase, min, max] = args.as_slice() else {
                    return Err(OperatorParseError::Usage(PHASE_USAGE));
                };
                let phase = phase
                    .parse::<Phase>()
                    .map_err(|_| invalid("phase", phase))?;
                let min = min.parse::<f64>().map_err(|_| invalid("min", min))?;
                let max = max.parse::<f64>().map_err(|_| invalid("max", max))?;
                Ok(OperatorCommand::Threshold(ThresholdQuery::new(phase, min, max)?))
            }
            "toggle" => {
                let [selector, state] = args.as_slice() else {
                    return Err(OperatorParseError::Usage(TOGGLE_USAGE));
                };
                let selector = selector
                    .parse::<usize>()
                    .map_err(|_| invalid("selector", selector))?;
                let next_state = state
                    .parse::<u8>()
                    .ok()
                    .and_then(|code| SwitchState::try_from(code).ok())
                    .ok_or_else(|| invalid("state", state))?;
                Ok(OperatorCommand::Toggle(ToggleRequest {
                    selector,
                    next_state,
                }))
            }
            "clear" if args.is_empty() => Ok(OperatorCommand::Clear),
            "clear" => Err(OperatorParseError::Usage("clear")),
            _ => Err(OperatorParseError::UnknownVerb(verb.to_owned())),
        }
    }
}

fn invalid(field: &'static str, value: &str) -> OperatorParseError {
    OperatorParseError::InvalidValue {
        field,
        value: value.to_owned(),
    }
}

/// Sending half, held by whoever produces operator directives.
#[derive(Debug, Clone)]
pub struct OperatorHandle {
    threshold: watch::Sender<Option<ThresholdQuery>>,
    toggles: mpsc::Sender<ToggleRequest>,
}

/// Receiving half, owned by the controller.
#[derive(Debug)]
pub struct OperatorInbox {
    threshold: watch::Receiver<Option<ThresholdQuery>>,
    toggles: mpsc::Receiver<ToggleRequest>,
}

pub fn operator_channel(
    initial: Option<ThresholdQuery>,
    capacity: usize,
) -> (OperatorHandle, OperatorInbox) {
    let (threshold_tx, threshold_rx) = watch::channel(initial);
    let (toggle_tx, toggle_rx) = mpsc::channel(capacity.max(1));
    (
        OperatorHandle {
            threshold: threshold_tx,
            toggles: toggle_tx,
        },
        OperatorInbox {
            threshold: threshold_rx,
            toggles: toggle_rx,
        },
    )
}

impl OperatorHandle {
    pub fn set_threshold(&self, query: Option<ThresholdQuery>) {
        self.threshold.send_replace(query);
    }

    pub async fn request_toggle(
        &self,
        request: ToggleRequest,
    ) -> Result<(), SendError<ToggleRequest>> {
        self.toggles.send(request).await
    }

    pub async fn apply(&self, command: OperatorCommand) -> Result<(), SendError<ToggleRequest>> {
        match command {
            OperatorCommand::Threshold(query) => {
                info!(threshold = %query, "operator threshold updated");
                self.set_threshold(Some(query));
            }
            OperatorCommand::Clear => {
                info!("operator threshold cleared");
                self.set_threshold(None);
            }
            OperatorCommand::Toggle(request) => {
                info!(
                    selector = request.selector,
                    next_state = %request.next_state,
                    "operator toggle queued"
                );
                self.request_toggle(request).await?;
            }
        }
        Ok(())
    }
}

impl OperatorInbox {
    /// Threshold in force for the cycle about to run.
    pub fn current_threshold(&self) -> Option<ThresholdQuery> {
        *self.threshold.borrow()
    }

    /// Every toggle queued since the previous cycle, in arrival order.
    pub fn drain_toggles(&mut self) -> Vec<ToggleRequest> {
        let mut drained = Vec::new();
        while let Ok(request) = self.toggles.try_recv() {
            drained.push(request);
        }
        drained
    }
}

/// Read operator commands line by line until EOF, shutdown, or the controller goes away.
///
/// Lines that fail to parse are logged and skipped.
pub async fn run_console<R>(
    reader: R,
    handle: OperatorHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("operator console shutdown");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("operator console reached end of input");
                    return Ok(());
                };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                match trimmed.parse::<OperatorCommand>() {
                    Ok(command) => {
                        if handle.apply(command).await.is_err() {
                            debug!("controller stopped; closing operator console");
                            return Ok(());
                        }
                    }
                    Err(err) => warn!(input = trimmed, error = %err, "ignoring operator command"),
                }
            }
        }
    }
}
