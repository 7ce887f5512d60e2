//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Idempotent switch difference commands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use nvc_msg::{DifferenceCommand, SwitchState};
use nvc_topology::SwitchRoster;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{ControllerError, Result};

/// Last state this controller commanded for one switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCommandState {
    pub switch_mrid: String,
    pub last_commanded_state: Option<SwitchState>,
}

/// Result of a toggle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Publish this command. `previous` restores the state if publication fails.
    Command {
        command: DifferenceCommand,
        previous: Option<SwitchState>,
    },
    /// The switch was already commanded to the requested state.
    NoOp { switch_mrid: String },
}

#[derive(Debug)]
pub struct DifferenceEmitter {
    roster: SwitchRoster,
    states: Mutex<IndexMap<String, SwitchCommandState>>,
}

impl DifferenceEmitter {
    pub fn new(roster: SwitchRoster) -> Self {
        let mut states = IndexMap::with_capacity(roster.len());
        for entry in roster.iter() {
            states
                .entry(entry.mrid.clone())
                .or_insert_with(|| SwitchCommandState {
                    switch_mrid: entry.mrid.clone(),
                    last_commanded_state: None,
                });
        }
        Self {
            roster,
            states: Mutex::new(states),
        }
    }

    pub fn roster(&self) -> &SwitchRoster {
        &self.roster
    }

    /// Resolve `selector` against the roster and build the transition command.
    ///
    /// The recorded state is updated before the command is returned; call
    /// [`DifferenceEmitter::rollback`] if it cannot be delivered.
    pub fn request_toggle(&self, selector: usize, next_state: SwitchState) -> Result<ToggleOutcome> {
        let entry = self
            .roster
            .get(selector)
            .ok_or(ControllerError::UnknownSwitch {
                selector,
                roster_len: self.roster.len(),
            })?;

        let mut states = self.states.lock();
        let state = states
            .entry(entry.mrid.clone())
            .or_insert_with(|| SwitchCommandState {
                switch_mrid: entry.mrid.clone(),
                last_commanded_state: None,
            });

        if state.last_commanded_state == Some(next_state) {
            debug!(selector, switch_mrid = %entry.mrid, state = %next_state, "switch already commanded");
            return Ok(ToggleOutcome::NoOp {
                switch_mrid: entry.mrid.clone(),
            });
        }

        let previous = state.last_commanded_state.replace(next_state);
        Ok(ToggleOutcome::Command {
            command: DifferenceCommand::toggle(entry.mrid.clone(), next_state),
            previous,
        })
    }

    /// Undo the state recorded for `command` when it was never delivered.
    pub fn rollback(&self, command: &DifferenceCommand, previous: Option<SwitchState>) {
        let mut states = self.states.lock();
        match states.get_mut(&command.switch_mrid) {
            Some(state) if state.last_commanded_state == Some(command.next_state) => {
                state.last_commanded_state = previous;
            }
            Some(state) => {
                warn!(
                    switch_mrid = %command.switch_mrid,
                    recorded = ?state.last_commanded_state,
                    "switch state changed before rollback; leaving it in place"
                );
            }
            None => {}
        }
    }

    pub fn state(&self, switch_mrid: &str) -> Option<SwitchCommandState> {
        self.states.lock().get(switch_mrid).cloned()
    }

    /// Copy of every tracked switch, in roster order.
    pub fn snapshot(&self) -> Vec<SwitchCommandState> {
        self.states.lock().values().cloned().collect()
    }
}
