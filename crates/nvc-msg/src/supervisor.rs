//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::logging::{log_message, MessageDirection, MessagingMetricsExporter};
use crate::{MessagingError, Result, Transport};

/// Snapshot of messaging metrics used by dashboards and monitoring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessagingMetrics {
    /// Payloads successfully handed to transports.
    pub sent: u64,
    /// Inbound payloads observed by the controller.
    pub received: u64,
    /// Payloads a transport failed to deliver.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MessagingMetrics {
        MessagingMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Fans outbound payloads out to registered transports and counts traffic.
///
/// Delivery is attempted once per transport; nothing is queued for retry.
#[derive(Default)]
pub struct MessagingSupervisor {
    transports: Vec<Arc<dyn Transport>>,
    counters: Counters,
    exporter: Option<MessagingMetricsExporter>,
}

impl std::fmt::Debug for MessagingSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.transports.iter().map(|t| t.name()).collect();
        f.debug_struct("MessagingSupervisor")
            .field("transports", &names)
            .field("metrics", &self.counters.snapshot())
            .field("exporter", &self.exporter.is_some())
            .finish()
    }
}

impl MessagingSupervisor {
    /// Construct a supervisor without transports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach prometheus handles mirrored from the internal counters.
    pub fn with_exporter(mut self, exporter: MessagingMetricsExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Register a transport for publish operations.
    pub fn register_transport<T>(&mut self, transport: Arc<T>)
    where
        T: Transport + 'static,
    {
        self.transports.push(transport as Arc<dyn Transport>);
    }

    /// Serialize `payload` and publish it on every registered transport.
    ///
    /// Every transport is attempted. The payload counts as published when at
    /// least one transport delivered it; otherwise the first failure is returned.
    pub fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<()> {
        let value = serde_json::to_value(payload)?;
        log_message(MessageDirection::Outbound, topic, &value);

        let mut first_error: Option<MessagingError> = None;
        let mut delivered = 0usize;
        for transport in &self.transports {
            match transport.send(topic, &value) {
                Ok(()) => {
                    delivered += 1;
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    if let Some(exporter) = &self.exporter {
                        exporter.observe_sent();
                    }
                }
                Err(err) => {
                    tracing::warn!(transport = transport.name(), topic, error = %err, "transport send failed");
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    if let Some(exporter) = &self.exporter {
                        exporter.observe_dropped();
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if delivered == 0 => Err(err),
            _ => Ok(()),
        }
    }

    /// Record that an inbound payload was taken off the subscription.
    pub fn observe_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.observe_received();
        }
    }

    /// Return the current metrics snapshot.
    pub fn metrics(&self) -> MessagingMetrics {
        self.counters.snapshot()
    }
}
