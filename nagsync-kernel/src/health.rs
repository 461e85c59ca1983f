use crate::fanout::Fanout;
use crate::session::SessionStatus;
use crate::state::SharedSession;
use crate::store::{ServiceFilter, SharedStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub session: SessionStatus,
    pub hosts_tracked: usize,
    pub services_tracked: usize,
    pub pending_checks: usize,
    pub problems: usize,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub subscribers: usize,
}

/// Connection bookkeeping shared with the MQTT listeners.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    /// Counts that fail to load are reported as 0.
    pub fn get_health(&self, session: &SharedSession, store: &SharedStore, fanout: &Fanout) -> KernelHealth {
        let stats = store.stats().unwrap_or_else(|e| {
            error!(error = %e, "failed to read store stats");
            Default::default()
        });
        let count = |filter: ServiceFilter| {
            store.count_services(&filter).unwrap_or_else(|e| {
                error!(?filter, error = %e, "failed to count services");
                0
            })
        };

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            session: session.lock().status(),
            hosts_tracked: stats.hosts,
            services_tracked: stats.services,
            pending_checks: count(ServiceFilter::PendingChecks),
            problems: count(ServiceFilter::Problems),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            subscribers: fanout.subscriber_count(),
        }
    }
}
