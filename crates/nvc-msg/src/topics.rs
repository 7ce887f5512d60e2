//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

const SIMULATION_TOPIC_PREFIX: &str = "/topic/goss.gridappsd.simulation";

/// Channel on which difference commands for a simulation are published.
pub fn simulation_input_topic(simulation_id: &str) -> String {
    format!("{SIMULATION_TOPIC_PREFIX}.input.{simulation_id}")
}

/// Channel on which a simulation streams its measurements.
pub fn simulation_output_topic(simulation_id: &str) -> String {
    format!("{SIMULATION_TOPIC_PREFIX}.output.{simulation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_scoped_to_the_simulation() {
        assert_eq!(
            simulation_input_topic("858290661"),
            "/topic/goss.gridappsd.simulation.input.858290661"
        );
        assert_eq!(
            simulation_output_topic("858290661"),
            "/topic/goss.gridappsd.simulation.output.858290661"
        );
    }
}
