/**
 * ENTITY STORE - Typed access to the replica's two collections
 *
 * ROLE: every read and write of hosts/services goes through `EntityStore`, so
 * the processor, the importer and the query side never touch a backend
 * directly. Each operation returns a `StoreError` and lets the caller decide
 * whether to log or surface it.
 *
 * `MemoryStore` keeps both collections in memory behind one lock, which also
 * makes `replace_all` atomic for concurrent readers.
 */

use crate::models::{Host, Service, ServiceKey, ServiceUpdate};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Service selections the kernel needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFilter {
    /// Everything not in state 0.
    Problems,
    /// Checks initiated but not yet processed.
    PendingChecks,
    Host(String),
}

impl ServiceFilter {
    pub fn matches(&self, service: &Service) -> bool {
        match self {
            ServiceFilter::Problems => service.state != 0,
            ServiceFilter::PendingChecks => service.check_in_progress,
            ServiceFilter::Host(host) => &service.host == host,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceSummary {
    pub hosts_removed: usize,
    pub services_removed: usize,
    pub hosts_inserted: usize,
    pub services_inserted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub hosts: usize,
    pub services: usize,
}

pub trait EntityStore: Send + Sync {
    fn find_host(&self, host: &str) -> Result<Option<Host>, StoreError>;

    fn find_service(&self, key: &ServiceKey) -> Result<Option<Service>, StoreError>;

    fn find_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>, StoreError>;

    fn count_services(&self, filter: &ServiceFilter) -> Result<usize, StoreError> {
        Ok(self.find_services(filter)?.len())
    }

    /// Applies a field-level update. Returns `false` when no record matched.
    fn update_service(&self, key: &ServiceKey, update: &ServiceUpdate) -> Result<bool, StoreError>;

    /// Clears both collections and upserts the given records in one step:
    /// readers see either the old replica or the new one. When two records
    /// share a key the last one wins.
    fn replace_all(&self, hosts: Vec<Host>, services: Vec<Service>) -> Result<ReplaceSummary, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub type SharedStore = Arc<dyn EntityStore>;

#[derive(Debug, Default)]
struct Collections {
    hosts: HashMap<String, Host>,
    services: BTreeMap<ServiceKey, Service>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("store closed".into()));
        }
        Ok(())
    }
}

impl EntityStore for MemoryStore {
    fn find_host(&self, host: &str) -> Result<Option<Host>, StoreError> {
        self.ensure_open()?;
        Ok(self.inner.read().hosts.get(host).cloned())
    }

    fn find_service(&self, key: &ServiceKey) -> Result<Option<Service>, StoreError> {
        self.ensure_open()?;
        Ok(self.inner.read().services.get(key).cloned())
    }

    fn find_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.read();
        Ok(inner.services.values().filter(|s| filter.matches(s)).cloned().collect())
    }

    fn count_services(&self, filter: &ServiceFilter) -> Result<usize, StoreError> {
        self.ensure_open()?;
        Ok(self.inner.read().services.values().filter(|s| filter.matches(s)).count())
    }

    fn update_service(&self, key: &ServiceKey, update: &ServiceUpdate) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        match inner.services.get_mut(key) {
            Some(service) => {
                update.apply(service);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn replace_all(&self, hosts: Vec<Host>, services: Vec<Service>) -> Result<ReplaceSummary, StoreError> {
        self.ensure_open()?;
        let hosts: HashMap<String, Host> = hosts.into_iter().map(|h| (h.host.clone(), h)).collect();
        let services: BTreeMap<ServiceKey, Service> =
            services.into_iter().map(|s| (s.key(), s)).collect();

        let mut inner = self.inner.write();
        let summary = ReplaceSummary {
            hosts_removed: inner.hosts.len(),
            services_removed: inner.services.len(),
            hosts_inserted: hosts.len(),
            services_inserted: services.len(),
        };
        inner.hosts = hosts;
        inner.services = services;
        debug!(?summary, "collections replaced");
        Ok(summary)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.read();
        Ok(StoreStats { hosts: inner.hosts.len(), services: inner.services.len() })
    }

    fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let inner = self.inner.read();
        info!(hosts = inner.hosts.len(), services = inner.services.len(), "store closed");
        Ok(())
    }
}

/// Backend that fails every call, for exercising error paths.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
impl EntityStore for UnavailableStore {
    fn find_host(&self, _: &str) -> Result<Option<Host>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    fn find_service(&self, _: &ServiceKey) -> Result<Option<Service>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    fn find_services(&self, _: &ServiceFilter) -> Result<Vec<Service>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    fn update_service(&self, _: &ServiceKey, _: &ServiceUpdate) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    fn replace_all(&self, _: Vec<Host>, _: Vec<Service>) -> Result<ReplaceSummary, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
}
