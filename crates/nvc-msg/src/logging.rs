//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use prometheus::{IntCounter, Opts, Registry};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Payload published via a transport.
    Outbound,
    /// Payload received from the subscription.
    Inbound,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, topic: &str, payload: &JsonValue) {
    debug!(
        topic,
        direction = ?direction,
        bytes = payload.to_string().len(),
        "messaging activity"
    );
}

/// Prometheus metric handles for messaging activity.
#[derive(Clone)]
pub struct MessagingMetricsExporter {
    sent: IntCounter,
    received: IntCounter,
    dropped: IntCounter,
}

impl MessagingMetricsExporter {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sent = IntCounter::with_opts(Opts::new(
            "nvc_messages_sent_total",
            "Payloads published via transports",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "nvc_messages_received_total",
            "Payloads consumed from the telemetry subscription",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "nvc_messages_dropped_total",
            "Payloads a transport failed to deliver",
        ))?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            sent,
            received,
            dropped,
        })
    }

    /// Record a sent payload.
    pub fn observe_sent(&self) {
        self.sent.inc();
    }

    /// Record a received payload.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record a dropped payload.
    pub fn observe_dropped(&self) {
        self.dropped.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_exporter_records_counts() {
        let registry = Registry::new();
        let metrics = MessagingMetricsExporter::register(&registry).expect("register metrics");
        metrics.observe_sent();
        metrics.observe_received();
        metrics.observe_dropped();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "nvc_messages_sent_total"));
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = Registry::new();
        MessagingMetricsExporter::register(&registry).expect("first registration");
        assert!(MessagingMetricsExporter::register(&registry).is_err());
    }
}
