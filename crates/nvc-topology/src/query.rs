//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology catalogs and measurement correlation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::Serialize;
use serde_json::Value;

use crate::errors::{Result, TopologyError};
use crate::model::SwitchRosterEntry;

/// Structured graph query sent to the model data manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQuery {
    pub request_type: &'static str,
    pub result_format: &'static str,
    pub query_string: String,
}

impl GraphQuery {
    pub fn switch_roster(model_id: &str) -> Self {
        Self {
            request_type: "QUERY",
            result_format: "JSON",
            query_string: switch_roster_query(model_id),
        }
    }
}

/// Query selecting every breaker-type switch on a feeder with both terminal buses.
pub fn switch_roster_query(model_id: &str) -> String {
    format!(
        r##"PREFIX r:  <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
PREFIX c:  <http://iec.ch/TC57/CIM100#>
SELECT ?cimtype ?name ?bus1 ?bus2 ?id WHERE {{
 SELECT ?cimtype ?name ?bus1 ?bus2 ?phs ?id WHERE {{
  VALUES ?fdrid {{"{model_id}"}}
  VALUES ?cimraw {{c:LoadBreakSwitch c:Recloser c:Breaker}}
  ?fdr c:IdentifiedObject.mRID ?fdrid.
  ?s r:type ?cimraw.
  bind(strafter(str(?cimraw),"#") as ?cimtype)
  ?s c:Equipment.EquipmentContainer ?fdr.
  ?s c:IdentifiedObject.name ?name.
  ?s c:IdentifiedObject.mRID ?id.
  ?t1 c:Terminal.ConductingEquipment ?s.
  ?t1 c:ACDCTerminal.sequenceNumber "1".
  ?t1 c:Terminal.ConnectivityNode ?cn1.
  ?cn1 c:IdentifiedObject.name ?bus1.
  ?t2 c:Terminal.ConductingEquipment ?s.
  ?t2 c:ACDCTerminal.sequenceNumber "2".
  ?t2 c:Terminal.ConnectivityNode ?cn2.
  ?cn2 c:IdentifiedObject.name ?bus2
  OPTIONAL {{?swp c:SwitchPhase.Switch ?s.
   ?swp c:SwitchPhase.phaseSide1 ?phsraw.
   bind(strafter(str(?phsraw),"SinglePhaseKind.") as ?phs) }}
 }} ORDER BY ?name ?phs
}}
GROUP BY ?cimtype ?name ?bus1 ?bus2 ?id
ORDER BY ?cimtype ?name"##
    )
}

/// Turn query result bindings into roster entries, preserving result order.
///
/// Accepts either the full response (`{"data": {"results": ...}}`), the
/// `results` document, or the bare bindings array.
pub fn parse_switch_bindings(response: &Value) -> Result<Vec<SwitchRosterEntry>> {
    let bindings = response
        .pointer("/data/results/bindings")
        .or_else(|| response.pointer("/results/bindings"))
        .unwrap_or(response)
        .as_array()
        .ok_or_else(|| query_error("switch roster response has no bindings array"))?;

    bindings
        .iter()
        .enumerate()
        .map(|(row, binding)| -> Result<SwitchRosterEntry> {
            let cell = |name: &str| {
                binding
                    .pointer(&format!("/{name}/value"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| query_error(format!("binding {row} is missing `{name}`")))
            };
            Ok(SwitchRosterEntry {
                name: cell("name")?.to_owned(),
                mrid: cell("id")?.to_owned(),
                endpoints: vec![cell("bus1")?.to_uppercase(), cell("bus2")?.to_uppercase()],
            })
        })
        .collect()
}

fn query_error(reason: impl Into<String>) -> TopologyError {
    TopologyError::Query {
        object_type: "switch roster".to_owned(),
        reason: reason.into(),
    }
}
