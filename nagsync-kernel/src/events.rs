//! Upstream event frames: `"<type> <metadata>"` header plus a JSON body.

use crate::models::{ServiceKey, ServiceUpdate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes a frame body into the typed event for `kind`.
pub fn decode_payload<T: DeserializeOwned>(kind: &'static str, payload: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice(payload).map_err(|source| FrameError::InvalidPayload { kind, source })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Blank,
    ProgramStatus,
    HostCheckInitiate,
    HostCheckProcessed,
    ServiceCheckInitiate,
    ServiceCheckProcessed,
    CommentAdd,
    CommentDelete,
    NotificationStart,
    EventLoopEnd,
    StateChange,
    Other(String),
}

impl EventKind {
    /// The type is the first space-separated token of the header.
    pub fn from_header(header: &str) -> Self {
        let name = header.split(' ').next().unwrap_or_default();
        match name {
            "" => EventKind::Blank,
            "program_status" => EventKind::ProgramStatus,
            "host_check_initiate" => EventKind::HostCheckInitiate,
            "host_check_processed" => EventKind::HostCheckProcessed,
            "service_check_initiate" => EventKind::ServiceCheckInitiate,
            "service_check_processed" => EventKind::ServiceCheckProcessed,
            "comment_add" => EventKind::CommentAdd,
            "comment_delete" => EventKind::CommentDelete,
            "notification_start" => EventKind::NotificationStart,
            "eventloopend" => EventKind::EventLoopEnd,
            "statechange" => EventKind::StateChange,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Blank => "",
            EventKind::ProgramStatus => "program_status",
            EventKind::HostCheckInitiate => "host_check_initiate",
            EventKind::HostCheckProcessed => "host_check_processed",
            EventKind::ServiceCheckInitiate => "service_check_initiate",
            EventKind::ServiceCheckProcessed => "service_check_processed",
            EventKind::CommentAdd => "comment_add",
            EventKind::CommentDelete => "comment_delete",
            EventKind::NotificationStart => "notification_start",
            EventKind::EventLoopEnd => "eventloopend",
            EventKind::StateChange => "statechange",
            EventKind::Other(name) => name,
        }
    }
}

/// Builds a frame header from an MQTT topic published under `prefix`.
///
/// Ex: ("nagios/events", "nagios/events/service_check_processed/web01")
///     -> "service_check_processed web01"
pub fn header_from_topic(prefix: &str, topic: &str) -> Option<String> {
    let rest = topic.strip_prefix(prefix.trim_end_matches('/'))?;
    let rest = rest.strip_prefix('/')?;
    Some(rest.split('/').collect::<Vec<_>>().join(" "))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Timeval {
    pub tv_sec: i64,
    #[serde(default)]
    pub tv_usec: i64,
}

impl Timeval {
    pub fn to_datetime(&self) -> Option<OffsetDateTime> {
        let nanos = i128::from(self.tv_sec) * 1_000_000_000 + i128::from(self.tv_usec) * 1_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramStatus {
    pub program_start: i64,
    #[serde(default)]
    pub timestamp: Option<Timeval>,
}

/// Whether a check event concerns the host itself or one of its services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    Host,
    Service,
}

fn check_key(scope: CheckScope, host: &str, service: Option<&str>) -> Option<ServiceKey> {
    match scope {
        CheckScope::Host => Some(ServiceKey::host_check(host)),
        CheckScope::Service => service.map(|s| ServiceKey::new(host, s)),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInitiate {
    pub host_name: String,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(default)]
    pub command_line: Option<String>,
    #[serde(default)]
    pub last_state: Option<i32>,
}

impl CheckInitiate {
    pub fn key(&self, scope: CheckScope) -> Option<ServiceKey> {
        check_key(scope, &self.host_name, self.service_description.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckProcessed {
    pub host_name: String,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub long_output: Option<String>,
    #[serde(default)]
    pub perf_data: Option<String>,
    #[serde(default)]
    pub current_attempt: i32,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    pub state: i32,
    #[serde(default)]
    pub last_state: i32,
    #[serde(default)]
    pub last_hard_state: i32,
    #[serde(default)]
    pub last_check: i64,
    #[serde(default)]
    pub last_state_change: i64,
}

impl CheckProcessed {
    pub fn key(&self, scope: CheckScope) -> Option<ServiceKey> {
        check_key(scope, &self.host_name, self.service_description.as_deref())
    }

    /// Field set written when a check result comes in.
    pub fn to_update(&self) -> ServiceUpdate {
        ServiceUpdate {
            check_in_progress: Some(false),
            output: Some(self.output.clone()),
            long_output: Some(self.long_output.clone()),
            perf_data: Some(self.perf_data.clone()),
            current_attempt: Some(self.current_attempt),
            max_attempts: self.max_attempts,
            state: Some(self.state),
            last_state: Some(self.last_state),
            last_hard_state: Some(self.last_hard_state),
            last_check: Some(self.last_check),
            last_state_change: Some(self.last_state_change),
            last_time_ok: (self.state == 0).then_some(self.last_check),
            ..ServiceUpdate::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_header() {
        assert_eq!(EventKind::from_header("program_status"), EventKind::ProgramStatus);
        assert_eq!(
            EventKind::from_header("service_check_processed web01 HTTP"),
            EventKind::ServiceCheckProcessed
        );
        assert_eq!(EventKind::from_header(""), EventKind::Blank);
        assert_eq!(EventKind::from_header(" leading-space"), EventKind::Blank);
        assert_eq!(EventKind::from_header("acknowledgement"), EventKind::Other("acknowledgement".into()));
        assert_eq!(EventKind::from_header("eventloopend").as_str(), "eventloopend");
    }

    #[test]
    fn test_decode_payload_reports_kind() {
        let err = decode_payload::<ProgramStatus>("program_status", b"{\"pid\": 1}").unwrap_err();
        assert!(err.to_string().starts_with("invalid program_status payload"));
        let ok: ProgramStatus = decode_payload("program_status", br#"{"program_start": 5}"#).unwrap();
        assert_eq!(ok.program_start, 5);
        assert!(ok.timestamp.is_none());
    }

    #[test]
    fn test_timeval_keeps_microseconds() {
        let dt = Timeval { tv_sec: 1_700_000_000, tv_usec: 250_000 }.to_datetime().unwrap();
        assert_eq!(dt.unix_timestamp(), 1_700_000_000);
        assert_eq!(dt.millisecond(), 250);
    }

    #[test]
    fn test_header_from_topic() {
        assert_eq!(
            header_from_topic("nagios/events", "nagios/events/service_check_processed/web01").as_deref(),
            Some("service_check_processed web01")
        );
        assert_eq!(
            header_from_topic("nagios/events/", "nagios/events/program_status").as_deref(),
            Some("program_status")
        );
        assert_eq!(header_from_topic("nagios/events", "nagios/eventsX/foo"), None);
        assert_eq!(header_from_topic("nagios/events", "other/program_status"), None);
    }

    #[test]
    fn test_processed_update_sets_last_time_ok_on_recovery() {
        let event: CheckProcessed = serde_json::from_value(json!({
            "host_name": "web01",
            "service_description": "HTTP",
            "output": "HTTP OK",
            "current_attempt": 1,
            "state": 0,
            "last_state": 2,
            "last_hard_state": 2,
            "last_check": 1700000100,
            "last_state_change": 1700000100
        }))
        .unwrap();

        let update = event.to_update();
        assert_eq!(update.check_in_progress, Some(false));
        assert_eq!(update.last_time_ok, Some(1700000100));
        assert_eq!(update.max_attempts, None);
        assert_eq!(event.key(CheckScope::Service), Some(ServiceKey::new("web01", "HTTP")));
    }

    #[test]
    fn test_processed_update_keeps_last_time_ok_on_problem() {
        let event: CheckProcessed = serde_json::from_value(json!({
            "host_name": "web01", "state": 1, "last_state": 0, "last_check": 5
        }))
        .unwrap();
        assert_eq!(event.to_update().last_time_ok, None);
        assert_eq!(event.key(CheckScope::Host), Some(ServiceKey::host_check("web01")));
        assert_eq!(event.key(CheckScope::Service), None);
    }
}
