//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology catalogs and measurement correlation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{Result, TopologyError};
use crate::index::{MeasurementIndex, SwitchRoster};
use crate::model::{ObjectType, RawMeasurementRecord, SwitchRosterEntry};
use crate::query::{parse_switch_bindings, GraphQuery};

/// Object-measurement request as understood by the model data manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyRequest {
    pub model_id: String,
    pub request_type: &'static str,
    pub result_format: &'static str,
    pub object_type: ObjectType,
}

impl TopologyRequest {
    pub const QUERY_OBJECT_MEASUREMENTS: &'static str = "QUERY_OBJECT_MEASUREMENTS";
    /// Request queue served by the power grid model data manager.
    pub const TOPIC: &'static str = "goss.gridappsd.process.request.data.powergridmodel";

    pub fn object_measurements(model_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            model_id: model_id.into(),
            request_type: Self::QUERY_OBJECT_MEASUREMENTS,
            result_format: "JSON",
            object_type,
        }
    }
}

/// External collaborator answering the two startup queries.
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    async fn object_measurements(
        &self,
        request: &TopologyRequest,
    ) -> Result<Vec<RawMeasurementRecord>>;

    async fn switch_roster(&self, query: &GraphQuery) -> Result<Vec<SwitchRosterEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimeouts {
    pub measurements: Duration,
    pub graph: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            measurements: Duration::from_secs(180),
            graph: Duration::from_secs(60),
        }
    }
}

/// Everything the controller needs from the topology, resolved once.
#[derive(Debug, Clone)]
pub struct ResolvedTopology {
    pub index: MeasurementIndex,
    pub roster: SwitchRoster,
}

/// Run the startup queries and build the measurement index and switch roster.
///
/// An empty roster query result falls back to the switches seen in the index.
pub async fn resolve_topology<R>(
    resolver: &R,
    model_id: &str,
    timeouts: QueryTimeouts,
) -> Result<ResolvedTopology>
where
    R: TopologyResolver + ?Sized,
{
    debug!(model_id, topic = TopologyRequest::TOPIC, "querying topology catalogs");
    let ac_request = TopologyRequest::object_measurements(model_id, ObjectType::AcLineSegment);
    let ac_line = bounded(
        ObjectType::AcLineSegment.as_str(),
        timeouts.measurements,
        resolver.object_measurements(&ac_request),
    )
    .await?;

    let switch_request =
        TopologyRequest::object_measurements(model_id, ObjectType::LoadBreakSwitch);
    let switches = bounded(
        ObjectType::LoadBreakSwitch.as_str(),
        timeouts.measurements,
        resolver.object_measurements(&switch_request),
    )
    .await?;

    let graph_query = GraphQuery::switch_roster(model_id);
    let roster_entries = bounded(
        "switch roster",
        timeouts.graph,
        resolver.switch_roster(&graph_query),
    )
    .await?;

    debug!(
        model_id,
        ac_line_records = ac_line.len(),
        switch_records = switches.len(),
        roster_entries = roster_entries.len(),
        "topology catalogs received"
    );

    let index = MeasurementIndex::build(ac_line, switches)?;
    let roster = if roster_entries.is_empty() {
        SwitchRoster::from_index(&index)
    } else {
        SwitchRoster::from_entries(roster_entries)
    };

    info!(
        model_id,
        measurements = index.len(),
        roster = roster.len(),
        "topology resolved"
    );
    Ok(ResolvedTopology { index, roster })
}

async fn bounded<T>(
    what: &str,
    after: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| TopologyError::Timeout {
            what: what.to_owned(),
            after,
        })?
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Serves catalogs from JSON files shaped like the service responses.
///
/// Layout: `<root>/ACLineSegment.json`, `<root>/LoadBreakSwitch.json`, and an
/// optional `<root>/switches.json` holding graph query bindings.
#[derive(Debug, Clone)]
pub struct FixtureResolver {
    root: PathBuf,
}

impl FixtureResolver {
    pub const ROSTER_FILE: &'static str = "switches.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_json(&self, file: &str, object_type: &str) -> Result<Value> {
        let path = self.root.join(file);
        let contents =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| TopologyError::Query {
                    object_type: object_type.to_owned(),
                    reason: format!("{}: {err}", path.display()),
                })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[async_trait]
impl TopologyResolver for FixtureResolver {
    async fn object_measurements(
        &self,
        request: &TopologyRequest,
    ) -> Result<Vec<RawMeasurementRecord>> {
        let object_type = request.object_type.as_str();
        let value = self
            .read_json(&format!("{object_type}.json"), object_type)
            .await?;
        let envelope: DataEnvelope<Vec<RawMeasurementRecord>> = serde_json::from_value(value)?;
        Ok(envelope.data)
    }

    async fn switch_roster(&self, query: &GraphQuery) -> Result<Vec<SwitchRosterEntry>> {
        if !self.root.join(Self::ROSTER_FILE).exists() {
            debug!(root = %self.root.display(), "no roster fixture; roster will come from the index");
            return Ok(Vec::new());
        }
        debug!(query_bytes = query.query_string.len(), "answering switch roster query from fixture");
        let value = self.read_json(Self::ROSTER_FILE, "switch roster").await?;
        parse_switch_bindings(&value)
    }
}
