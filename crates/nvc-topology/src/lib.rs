//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology catalogs and measurement correlation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Resolves a feeder's equipment catalogs once at startup and turns them into
//! an immutable [`MeasurementIndex`] plus the switch roster used for toggles.

pub mod errors;
pub mod index;
pub mod model;
pub mod query;
pub mod resolver;

pub use errors::{Result, TopologyError};
pub use index::{MeasurementIndex, SwitchRoster};
pub use model::{
    EquipmentRecord, MeasurementRole, ObjectType, Phase, RawMeasurementRecord, SwitchRosterEntry,
};
pub use query::{parse_switch_bindings, switch_roster_query, GraphQuery};
pub use resolver::{
    resolve_topology, FixtureResolver, QueryTimeouts, ResolvedTopology, TopologyRequest,
    TopologyResolver,
};
