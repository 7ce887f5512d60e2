//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-message telemetry selection against the measurement index."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Pure selectors run once per telemetry message.

use std::collections::HashSet;
use std::fmt;

use nvc_common::ThresholdSettings;
use nvc_msg::TelemetryMessage;
use nvc_topology::{MeasurementIndex, Phase};

use crate::errors::{ControllerError, Result};

/// Operator criterion selecting buses whose voltage magnitude lies in an open window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdQuery {
    pub phase: Phase,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
}

impl ThresholdQuery {
    pub fn new(phase: Phase, min_magnitude: f64, max_magnitude: f64) -> Result<Self> {
        // Also rejects NaN bounds.
        if !(min_magnitude < max_magnitude) {
            return Err(ControllerError::InvalidThreshold {
                reason: format!(
                    "min_magnitude {min_magnitude} must be below max_magnitude {max_magnitude}"
                ),
            });
        }
        Ok(Self {
            phase,
            min_magnitude,
            max_magnitude,
        })
    }

    /// Strict on both bounds: a magnitude equal to either bound is outside.
    pub fn admits(&self, magnitude: f64) -> bool {
        self.min_magnitude < magnitude && magnitude < self.max_magnitude
    }
}

impl fmt::Display for ThresholdQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase {} in ({}, {})",
            self.phase, self.min_magnitude, self.max_magnitude
        )
    }
}

impl TryFrom<&ThresholdSettings> for ThresholdQuery {
    type Error = ControllerError;

    fn try_from(settings: &ThresholdSettings) -> Result<Self> {
        let phase = settings
            .phase
            .parse::<Phase>()
            .map_err(|reason| ControllerError::InvalidThreshold { reason })?;
        Self::new(phase, settings.min_magnitude, settings.max_magnitude)
    }
}

/// Buses on `query.phase` whose sample magnitude lies strictly inside the window.
///
/// Measurements absent from the message, or present without a magnitude, are
/// skipped.
pub fn select_voltage_nodes(
    index: &MeasurementIndex,
    message: &TelemetryMessage,
    query: &ThresholdQuery,
) -> HashSet<String> {
    index
        .voltage_records(query.phase)
        .filter_map(|record| {
            let magnitude = message.sample(&record.measurement_id)?.magnitude?;
            query
                .admits(magnitude)
                .then(|| record.bus_or_equipment_name.clone())
        })
        .collect()
}

/// Switches whose position code in this message is 0 (open).
pub fn select_open_switches(index: &MeasurementIndex, message: &TelemetryMessage) -> HashSet<String> {
    index
        .switch_records()
        .filter(|record| {
            message
                .sample(&record.measurement_id)
                .and_then(|sample| sample.value)
                == Some(0.0)
        })
        .map(|record| record.bus_or_equipment_name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvc_msg::{RawTelemetry, TelemetryMessage};
    use nvc_topology::RawMeasurementRecord;
    use serde_json::json;

    fn record(measid: &str, kind: &str, phase: &str, name: &str, eqid: Option<&str>) -> RawMeasurementRecord {
        RawMeasurementRecord {
            measid: measid.into(),
            measurement_type: kind.into(),
            eqname: name.into(),
            eqid: eqid.map(Into::into),
            eqtype: None,
            phases: Some(phase.into()),
            bus: (kind == "PNV").then(|| name.into()),
        }
    }

    fn index() -> MeasurementIndex {
        MeasurementIndex::build(
            vec![
                record("v1", "PNV", "A", "N1", None),
                record("v2", "PNV", "A", "N2", None),
                record("v3", "PNV", "B", "N3", None),
                record("v4", "PNV", "A", "N1", None),
            ],
            vec![
                record("p1", "Pos", "A", "sw1", Some("S1")),
                record("p2", "Pos", "A", "sw2", Some("S2")),
            ],
        )
        .expect("index")
    }

    fn message(value: serde_json::Value) -> TelemetryMessage {
        TelemetryMessage::decode(&RawTelemetry::from(value)).expect("decode")
    }

    #[test]
    fn voltage_window_is_exclusive_and_phase_scoped() {
        let msg = message(json!({
            "timestamp": 10,
            "measurements": {
                "v1": { "magnitude": 3000.0 },
                "v2": { "magnitude": 2000.0 },
                "v3": { "magnitude": 3000.0 },
                "v4": { "magnitude": 2500.0 }
            }
        }));
        let query = ThresholdQuery::new(Phase::A, 2000.0, 4000.0).expect("query");
        let nodes = select_voltage_nodes(&index(), &msg, &query);
        assert_eq!(nodes, HashSet::from(["N1".to_owned()]));
    }

    #[test]
    fn samples_without_magnitude_are_skipped() {
        let msg = message(json!({
            "timestamp": 10,
            "measurements": { "v1": { "value": 1.0 } }
        }));
        let query = ThresholdQuery::new(Phase::A, 0.0, 1.0e9).expect("query");
        assert!(select_voltage_nodes(&index(), &msg, &query).is_empty());
    }

    #[test]
    fn open_switches_report_zero_position_only() {
        let msg = message(json!({
            "timestamp": 10,
            "measurements": {
                "p1": { "value": 0 },
                "p2": { "value": 1 },
                "v1": { "value": 0 }
            }
        }));
        let open = select_open_switches(&index(), &msg);
        assert_eq!(open, HashSet::from(["sw1".to_owned()]));
    }

    #[test]
    fn empty_or_inverted_window_is_rejected() {
        assert!(ThresholdQuery::new(Phase::B, 10.0, 10.0).is_err());
        assert!(ThresholdQuery::new(Phase::B, 11.0, 10.0).is_err());
        assert!(ThresholdQuery::new(Phase::B, f64::NAN, 10.0).is_err());
    }

    #[test]
    fn settings_convert_with_phase_validation() {
        let settings = ThresholdSettings {
            phase: "C".into(),
            min_magnitude: 2000.0,
            max_magnitude: 2500.0,
        };
        let query = ThresholdQuery::try_from(&settings).expect("valid");
        assert_eq!(query.phase, Phase::C);

        let bad = ThresholdSettings {
            phase: "N".into(),
            ..settings
        };
        assert!(matches!(
            ThresholdQuery::try_from(&bad),
            Err(ControllerError::InvalidThreshold { .. })
        ));
    }
}
