//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology catalogs and measurement correlation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::errors::{Result, TopologyError};
use crate::model::{
    EquipmentRecord, MeasurementRole, Phase, RawMeasurementRecord, SwitchRosterEntry,
    PNV_MEASUREMENT_TYPE, POSITION_MEASUREMENT_TYPE,
};

/// Immutable mapping from measurement id to the equipment it observes.
///
/// Built once per simulation run. The voltage-by-phase and switch views are
/// computed at construction and never change afterwards.
#[derive(Debug, Clone)]
pub struct MeasurementIndex {
    records: IndexMap<String, EquipmentRecord>,
    voltage_by_phase: [Vec<usize>; 3],
    switches: Vec<usize>,
}

impl MeasurementIndex {
    /// Project the raw catalogs onto PNV voltage and switch position records.
    ///
    /// Records of any other measurement type are dropped silently. Voltage
    /// records without a single A/B/C phase cannot be selected by a threshold
    /// query and are dropped as well.
    pub fn build(
        ac_line_records: Vec<RawMeasurementRecord>,
        switch_records: Vec<RawMeasurementRecord>,
    ) -> Result<Self> {
        let mut records: IndexMap<String, EquipmentRecord> = IndexMap::new();
        let mut voltage_by_phase: [Vec<usize>; 3] = Default::default();
        let mut switches = Vec::new();
        let mut skipped_phase = 0usize;

        for raw in ac_line_records
            .into_iter()
            .filter(|raw| raw.measurement_type == PNV_MEASUREMENT_TYPE)
        {
            let Some(phase) = raw.phases.as_deref().and_then(|p| p.parse::<Phase>().ok()) else {
                skipped_phase += 1;
                continue;
            };
            let record = EquipmentRecord {
                measurement_id: raw.measid,
                role: MeasurementRole::VoltagePhaseNeutral,
                phase: Some(phase),
                bus_or_equipment_name: raw.bus.unwrap_or(raw.eqname),
                switch_mrid: None,
            };
            if let Some(slot) = insert_unique(&mut records, record) {
                voltage_by_phase[phase.index()].push(slot);
            }
        }

        for raw in switch_records
            .into_iter()
            .filter(|raw| raw.measurement_type == POSITION_MEASUREMENT_TYPE)
        {
            let record = EquipmentRecord {
                measurement_id: raw.measid,
                role: MeasurementRole::SwitchPosition,
                phase: raw.phases.as_deref().and_then(|p| p.parse::<Phase>().ok()),
                bus_or_equipment_name: raw.eqname,
                switch_mrid: raw.eqid,
            };
            if let Some(slot) = insert_unique(&mut records, record) {
                switches.push(slot);
            }
        }

        let mut missing = Vec::new();
        if voltage_by_phase.iter().all(Vec::is_empty) {
            missing.push("phase-to-neutral voltage measurements");
        }
        if switches.is_empty() {
            missing.push("switch position measurements");
        }
        if !missing.is_empty() {
            return Err(TopologyError::Incomplete { missing });
        }

        debug!(
            voltage_a = voltage_by_phase[0].len(),
            voltage_b = voltage_by_phase[1].len(),
            voltage_c = voltage_by_phase[2].len(),
            switches = switches.len(),
            skipped_phase,
            "measurement index built"
        );

        Ok(Self {
            records,
            voltage_by_phase,
            switches,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, measurement_id: &str) -> Option<&EquipmentRecord> {
        self.records.get(measurement_id)
    }

    /// Voltage records measured on `phase`.
    pub fn voltage_records(&self, phase: Phase) -> impl Iterator<Item = &EquipmentRecord> + '_ {
        self.voltage_by_phase[phase.index()]
            .iter()
            .filter_map(|slot| self.records.get_index(*slot).map(|(_, record)| record))
    }

    /// Switch position records in catalog order.
    pub fn switch_records(&self) -> impl Iterator<Item = &EquipmentRecord> + '_ {
        self.switches
            .iter()
            .filter_map(|slot| self.records.get_index(*slot).map(|(_, record)| record))
    }
}

fn insert_unique(
    records: &mut IndexMap<String, EquipmentRecord>,
    record: EquipmentRecord,
) -> Option<usize> {
    match records.entry(record.measurement_id.clone()) {
        Entry::Occupied(existing) => {
            warn!(
                measurement_id = %existing.key(),
                "duplicate measurement id in topology catalog; keeping first"
            );
            None
        }
        Entry::Vacant(slot) => {
            let index = slot.index();
            slot.insert(record);
            Some(index)
        }
    }
}

/// Ordered list of switches an operator can address by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchRoster {
    entries: Vec<SwitchRosterEntry>,
}

impl SwitchRoster {
    pub fn from_entries(entries: Vec<SwitchRosterEntry>) -> Self {
        Self { entries }
    }

    /// Distinct switch mRIDs from the index, ordered by equipment name.
    pub fn from_index(index: &MeasurementIndex) -> Self {
        let mut by_mrid: IndexMap<&str, &str> = IndexMap::new();
        for record in index.switch_records() {
            if let Some(mrid) = record.switch_mrid.as_deref() {
                by_mrid
                    .entry(mrid)
                    .or_insert(record.bus_or_equipment_name.as_str());
            }
        }
        let mut entries: Vec<SwitchRosterEntry> = by_mrid
            .into_iter()
            .map(|(mrid, name)| SwitchRosterEntry {
                name: name.to_owned(),
                mrid: mrid.to_owned(),
                endpoints: Vec::new(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.mrid.cmp(&b.mrid)));
        Self { entries }
    }

    pub fn get(&self, selector: usize) -> Option<&SwitchRosterEntry> {
        self.entries.get(selector)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwitchRosterEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn typed(mut record: RawMeasurementRecord, kind: &str) -> RawMeasurementRecord {
        record.measurement_type = kind.into();
        record
    }

    #[test]
    fn build_projects_pnv_and_position_records() {
        let index = MeasurementIndex::build(
            vec![
                pnv("v1", "A", "N1"),
                pnv("v2", "B", "N2"),
                typed(pnv("a1", "A", "N1"), "A"),
                typed(pnv("va1", "A", "N1"), "VA"),
            ],
            vec![
                pos("s1", "sw_671692", "S1"),
                typed(pos("s1-a", "sw_671692", "S1"), "A"),
            ],
        )
        .expect("index builds");

        assert_eq!(index.len(), 3);
        assert!(index.get("a1").is_none());
        let phase_a: Vec<_> = index
            .voltage_records(Phase::A)
            .map(|r| r.bus_or_equipment_name.as_str())
            .collect();
        assert_eq!(phase_a, vec!["N1"]);
        assert_eq!(index.voltage_records(Phase::C).count(), 0);
        let switch = index.switch_records().next().expect("switch");
        assert_eq!(switch.switch_mrid.as_deref(), Some("S1"));
        assert_eq!(switch.role, MeasurementRole::SwitchPosition);
    }

    #[test]
    fn empty_projection_is_incomplete() {
        let err = MeasurementIndex::build(
            vec![typed(pnv("a1", "A", "N1"), "A")],
            vec![pos("s1", "sw", "S1")],
        )
        .expect_err("no voltage records");
        match err {
            TopologyError::Incomplete { missing } => {
                assert_eq!(missing, vec!["phase-to-neutral voltage measurements"])
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = MeasurementIndex::build(Vec::new(), Vec::new()).expect_err("nothing usable");
        assert!(err.to_string().contains("switch position measurements"));
    }

    #[test]
    fn secondary_phases_are_not_indexed() {
        let index = MeasurementIndex::build(
            vec![pnv("v1", "A", "N1"), pnv("v-s1", "s1", "N9")],
            vec![pos("s1", "sw", "S1")],
        )
        .expect("index builds");
        assert!(index.get("v-s1").is_none());
    }

    #[test]
    fn duplicate_measurement_ids_keep_first() {
        let index = MeasurementIndex::build(
            vec![pnv("v1", "A", "N1"), pnv("v1", "B", "N2")],
            vec![pos("s1", "sw", "S1")],
        )
        .expect("index builds");
        assert_eq!(index.voltage_records(Phase::A).count(), 1);
        assert_eq!(index.voltage_records(Phase::B).count(), 0);
    }

    #[test]
    fn roster_from_index_dedupes_and_orders_by_name() {
        let index = MeasurementIndex::build(
            vec![pnv("v1", "A", "N1")],
            vec![
                pos("m-z-a", "zeta", "SZ"),
                pos("m-z-b", "zeta", "SZ"),
                pos("m-a", "alpha", "SA"),
            ],
        )
        .expect("index builds");
        let roster = SwitchRoster::from_index(&index);
        let mrids: Vec<_> = roster.iter().map(|e| e.mrid.as_str()).collect();
        assert_eq!(mrids, vec!["SA", "SZ"]);
        assert!(roster.get(2).is_none());
    }
}
