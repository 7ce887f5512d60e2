//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the controller runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use serde_json::Value;

/// The parts of a serialized simulation request the controller depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationRequest {
    /// Feeder/line mRID used as the topology model identifier.
    pub model_id: String,
    pub raw: Value,
}

impl SimulationRequest {
    /// Parse a request passed on the command line.
    ///
    /// Shells frequently leave stray single quotes around the JSON document,
    /// so those are stripped before decoding.
    pub fn from_cli_arg(arg: &str) -> Result<Self> {
        let cleaned = arg.replace('\'', "");
        let raw: Value = serde_json::from_str(cleaned.trim())
            .with_context(|| "simulation request is not valid JSON")?;
        let model_id = raw
            .pointer("/power_system_config/Line_name")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("simulation request is missing power_system_config.Line_name"))?
            .to_owned();
        Ok(Self { model_id, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_line_name() {
        let request = SimulationRequest::from_cli_arg(
            r#"'{"power_system_config": {"Line_name":"_C1C3E687-6FFD-C753-582B-632A27E28507"}}'"#,
        )
        .expect("request parses");
        assert_eq!(request.model_id, "_C1C3E687-6FFD-C753-582B-632A27E28507");
    }

    #[test]
    fn missing_line_name_is_reported() {
        let err = SimulationRequest::from_cli_arg(r#"{"power_system_config": {}}"#)
            .expect_err("missing model id");
        assert!(err.to_string().contains("Line_name"));
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(SimulationRequest::from_cli_arg("not json").is_err());
    }
}
