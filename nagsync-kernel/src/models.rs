use crate::priority::{classify, Priority};
use serde::{Deserialize, Serialize};

/// Pseudo-service carrying host reachability in the services collection.
pub const HOST_SERVICE: &str = "DOWN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub host: String,
    pub alias: Option<String>,
    pub address: Option<String>,
    pub icon: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub host: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self { host: host.into(), service: service.into() }
    }

    /// Key of the host's "DOWN" pseudo-service.
    pub fn host_check(host: impl Into<String>) -> Self {
        Self::new(host, HOST_SERVICE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub host: String,
    pub service: String,
    pub state: i32,
    pub last_state: i32,
    pub last_hard_state: i32,
    pub output: Option<String>,
    pub long_output: Option<String>,
    pub perf_data: Option<String>,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub last_check: i64,
    pub last_state_change: i64,
    pub last_time_ok: i64,
    pub flapping: bool,
    pub acknowledged: bool,
    pub check_in_progress: bool,
    pub command_line: Option<String>,
}

impl Service {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.host.clone(), self.service.clone())
    }

    pub fn is_host_check(&self) -> bool {
        self.service == HOST_SERVICE
    }

    /// Derived on every read, never stored.
    pub fn priority(&self) -> Option<Priority> {
        classify(
            self.is_host_check(),
            self.state,
            self.current_attempt,
            self.max_attempts,
            self.acknowledged,
        )
    }

    pub fn into_view(self) -> ServiceView {
        let priority = self.priority();
        ServiceView { service: self, priority }
    }
}

/// A service record as subscribers see it: stored fields plus computed priority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub service: Service,
    pub priority: Option<Priority>,
}

/// Field-level update of a service record. `None` leaves the field untouched.
///
/// The same value is written to the store and merged into the copy that gets
/// broadcast, so subscribers and the replica never disagree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceUpdate {
    pub check_in_progress: Option<bool>,
    pub command_line: Option<Option<String>>,
    pub output: Option<Option<String>>,
    pub long_output: Option<Option<String>>,
    pub perf_data: Option<Option<String>>,
    pub current_attempt: Option<i32>,
    pub max_attempts: Option<i32>,
    pub state: Option<i32>,
    pub last_state: Option<i32>,
    pub last_hard_state: Option<i32>,
    pub last_check: Option<i64>,
    pub last_state_change: Option<i64>,
    pub last_time_ok: Option<i64>,
}

impl ServiceUpdate {
    /// Update recorded when a check starts running.
    pub fn check_started(command_line: Option<String>) -> Self {
        Self {
            check_in_progress: Some(true),
            command_line: Some(command_line),
            ..Self::default()
        }
    }

    pub fn apply(&self, target: &mut Service) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut target.check_in_progress, &self.check_in_progress);
        set(&mut target.command_line, &self.command_line);
        set(&mut target.output, &self.output);
        set(&mut target.long_output, &self.long_output);
        set(&mut target.perf_data, &self.perf_data);
        set(&mut target.current_attempt, &self.current_attempt);
        set(&mut target.max_attempts, &self.max_attempts);
        set(&mut target.state, &self.state);
        set(&mut target.last_state, &self.last_state);
        set(&mut target.last_hard_state, &self.last_hard_state);
        set(&mut target.last_check, &self.last_check);
        set(&mut target.last_state_change, &self.last_state_change);
        set(&mut target.last_time_ok, &self.last_time_ok);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostDetails {
    pub host: String,
    pub data: Host,
}
