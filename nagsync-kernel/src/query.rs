//! Read side of the replica, shared by the WebSocket protocol and the REST routes.

use crate::models::{HostDetails, ServiceView};
use crate::priority::priority_map;
use crate::store::{ServiceFilter, SharedStore};
use std::collections::BTreeMap;
use tracing::{error, warn};

/// `host -> service -> record`, problems only.
pub type FullSync = BTreeMap<String, BTreeMap<String, ServiceView>>;

#[derive(Clone)]
pub struct QueryService {
    store: SharedStore,
}

impl QueryService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Every service not in state 0, grouped by host, priority attached.
    /// A store failure yields an empty map.
    pub fn full_sync(&self) -> FullSync {
        let issues = match self.store.find_services(&ServiceFilter::Problems) {
            Ok(issues) => issues,
            Err(e) => {
                error!(error = %e, "failed to search for problem services");
                return FullSync::new();
            }
        };

        let mut grouped = FullSync::new();
        for issue in issues {
            let host = issue.host.clone();
            let service = issue.service.clone();
            grouped.entry(host).or_default().insert(service, issue.into_view());
        }
        grouped
    }

    pub fn priorities(&self) -> BTreeMap<u8, &'static str> {
        priority_map()
    }

    /// `None` both for unknown hosts and store failures; each is logged.
    pub fn host_details(&self, host: &str) -> Option<HostDetails> {
        match self.store.find_host(host) {
            Ok(Some(data)) => Some(HostDetails { host: host.to_string(), data }),
            Ok(None) => {
                warn!(host, "no match for host");
                None
            }
            Err(e) => {
                error!(host, error = %e, "failed to search for host");
                None
            }
        }
    }

    pub fn host_services(&self, host: &str) -> Vec<ServiceView> {
        match self.store.find_services(&ServiceFilter::Host(host.to_string())) {
            Ok(services) => services.into_iter().map(|s| s.into_view()).collect(),
            Err(e) => {
                error!(host, error = %e, "failed to list host services");
                Vec::new()
            }
        }
    }
}
