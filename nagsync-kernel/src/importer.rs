/**
 * RESYNC IMPORTER - Rebuilds the replica from a full upstream dump
 *
 * ROLE: turns the snapshot reply (one JSON object of raw host/service
 * records) into typed records and swaps them in with a single
 * `replace_all`. Anything absent from the dump disappears from the replica.
 *
 * Replies with `min_records` keys or fewer are treated as partial and
 * ignored. The broker protocol carries no message kind, so size is the only
 * signal that a reply is a full dump.
 */

use crate::models::{Host, Service, HOST_SERVICE};
use crate::state::SharedSession;
use crate::store::{ReplaceSummary, SharedStore, StoreError};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

/// NagMQ sends flags either as JSON booleans or as 0/1.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(i)) => i != 0,
        None => false,
    })
}

/// Check fields shared by host and service records.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCheck {
    current_state: i32,
    last_state: i32,
    last_hard_state: i32,
    plugin_output: Option<String>,
    long_plugin_output: Option<String>,
    perf_data: Option<String>,
    current_attempt: i32,
    max_attempts: i32,
    last_check: i64,
    last_state_change: i64,
    #[serde(deserialize_with = "flag")]
    is_flapping: bool,
    #[serde(deserialize_with = "flag")]
    problem_has_been_acknowledged: bool,
}

impl RawCheck {
    fn into_service(self, host: String, service: String, last_time_ok: i64) -> Service {
        Service {
            host,
            service,
            state: self.current_state,
            last_state: self.last_state,
            last_hard_state: self.last_hard_state,
            output: self.plugin_output,
            long_output: self.long_plugin_output,
            perf_data: self.perf_data,
            current_attempt: self.current_attempt,
            max_attempts: self.max_attempts,
            last_check: self.last_check,
            last_state_change: self.last_state_change,
            last_time_ok,
            flapping: self.is_flapping,
            acknowledged: self.problem_has_been_acknowledged,
            check_in_progress: false,
            command_line: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHost {
    host_name: String,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    icon_image: Option<String>,
    #[serde(default)]
    icon_image_alt: Option<String>,
    #[serde(default)]
    last_time_up: i64,
    #[serde(flatten)]
    check: RawCheck,
}

#[derive(Debug, Deserialize)]
struct RawService {
    host_name: String,
    service_description: String,
    #[serde(default)]
    last_time_ok: i64,
    #[serde(flatten)]
    check: RawCheck,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportSummary {
    pub records: usize,
    pub skipped: usize,
    pub replaced: ReplaceSummary,
}

/// Converts raw records into hosts and services. A host record yields the
/// host itself plus its "DOWN" pseudo-service; unknown types and records that
/// fail to decode are counted as skipped.
pub fn build_records(raw: &Map<String, Value>) -> (Vec<Host>, Vec<Service>, usize) {
    let mut hosts = Vec::new();
    let mut services = Vec::new();
    let mut skipped = 0;

    for (key, record) in raw {
        match record.get("type").and_then(Value::as_str) {
            Some("host") => match RawHost::deserialize(record) {
                Ok(h) => {
                    services.push(h.check.into_service(h.host_name.clone(), HOST_SERVICE.to_string(), h.last_time_up));
                    hosts.push(Host {
                        host: h.host_name,
                        alias: h.alias,
                        address: h.address,
                        icon: h.icon_image,
                        kind: h.icon_image_alt,
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping malformed host record");
                    skipped += 1;
                }
            },
            Some("service") => match RawService::deserialize(record) {
                Ok(s) => services.push(s.check.into_service(s.host_name, s.service_description, s.last_time_ok)),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping malformed service record");
                    skipped += 1;
                }
            },
            _ => skipped += 1,
        }
    }

    (hosts, services, skipped)
}

pub struct Importer {
    store: SharedStore,
    session: SharedSession,
    min_records: usize,
}

impl Importer {
    pub fn new(store: SharedStore, session: SharedSession, min_records: usize) -> Self {
        Self { store, session, min_records }
    }

    /// Replaces the replica with the snapshot and reopens the session.
    pub fn import_snapshot(&self, raw: &Map<String, Value>) -> Result<ImportSummary, StoreError> {
        let (hosts, services, skipped) = build_records(raw);
        let replaced = self.store.replace_all(hosts, services)?;
        info!(
            hosts_cleared = replaced.hosts_removed,
            services_cleared = replaced.services_removed,
            hosts = replaced.hosts_inserted,
            services = replaced.services_inserted,
            skipped,
            "replica repopulated"
        );
        self.session.lock().complete_resync();
        Ok(ImportSummary { records: raw.len(), skipped, replaced })
    }

    /// Entry point for raw replies from the control channel. Returns the
    /// summary when an import actually ran.
    pub fn handle_response(&self, payload: &[u8]) -> Option<ImportSummary> {
        let raw: Map<String, Value> = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "ignoring unparseable snapshot reply");
                return None;
            }
        };

        if raw.len() <= self.min_records {
            debug!(objects = raw.len(), threshold = self.min_records, "ignoring undersized snapshot reply");
            return None;
        }

        info!(objects = raw.len(), "snapshot received, repopulating hosts and services");
        match self.import_snapshot(&raw) {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "snapshot import failed, replica stays inactive");
                None
            }
        }
    }
}
