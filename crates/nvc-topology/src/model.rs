//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology catalogs and measurement correlation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Measurement type tag for phase-to-neutral voltage.
pub const PNV_MEASUREMENT_TYPE: &str = "PNV";
/// Measurement type tag for switch position.
pub const POSITION_MEASUREMENT_TYPE: &str = "Pos";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    pub fn index(self) -> usize {
        match self {
            Phase::A => 0,
            Phase::B => 1,
            Phase::C => 2,
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Phase::A),
            "B" | "b" => Ok(Phase::B),
            "C" | "c" => Ok(Phase::C),
            other => Err(format!("unknown phase '{other}' (expected A, B or C)")),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementRole {
    VoltagePhaseNeutral,
    SwitchPosition,
}

/// Equipment class requested from the model data manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectType {
    #[serde(rename = "ACLineSegment")]
    AcLineSegment,
    LoadBreakSwitch,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::AcLineSegment => "ACLineSegment",
            ObjectType::LoadBreakSwitch => "LoadBreakSwitch",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry exactly as returned by an object-measurement query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMeasurementRecord {
    #[serde(alias = "measurement_id")]
    pub measid: String,
    #[serde(rename = "type")]
    pub measurement_type: String,
    #[serde(default)]
    pub eqname: String,
    #[serde(default)]
    pub eqid: Option<String>,
    #[serde(default)]
    pub eqtype: Option<String>,
    #[serde(default)]
    pub phases: Option<String>,
    #[serde(default)]
    pub bus: Option<String>,
}

/// A measurement correlated to the equipment it observes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquipmentRecord {
    pub measurement_id: String,
    pub role: MeasurementRole,
    pub phase: Option<Phase>,
    /// Bus name for voltage measurements, equipment name for switches.
    pub bus_or_equipment_name: String,
    pub switch_mrid: Option<String>,
}

/// Controllable switch as resolved by the structured graph query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwitchRosterEntry {
    pub name: String,
    pub mrid: String,
    /// Terminal bus names, upper-cased.
    pub endpoints: Vec<String>,
}
