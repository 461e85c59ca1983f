/**
 * EVENT PROCESSOR - Applies the live Nagios event stream to the replica
 *
 * ROLE: one call per upstream frame. Heartbeats go to the session tracker;
 * check lifecycle events update the matching service record and decide
 * whether subscribers need a delta.
 *
 * RULES:
 * - blank event types are ignored, always
 * - while the session is inactive only `program_status` gets through
 * - a check event without a matching record is dropped (no auto-create)
 * - a processed check is broadcast only when it moves the stored state or
 *   its derived priority (soft to hard escalation); repeated identical
 *   results update the record silently
 * - nothing here returns an error to the event source: failures are logged
 *   and the frame is dropped
 */

use crate::control::ControlChannel;
use crate::events::{decode_payload, CheckInitiate, CheckProcessed, CheckScope, EventKind, ProgramStatus};
use crate::fanout::{Fanout, ServerEvent, StateUpdate};
use crate::models::{Service, ServiceKey, ServiceUpdate};
use crate::session::HeartbeatOutcome;
use crate::state::SharedSession;
use crate::store::{ServiceFilter, SharedStore};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, warn};

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Blank event type.
    Ignored,
    /// Dropped because the replica is being rebuilt.
    Inactive,
    Heartbeat { resync_requested: bool },
    /// Store updated; `broadcast` tells whether subscribers were notified.
    Applied { broadcast: bool },
    /// No record for the event's key.
    Missing,
    /// Payload did not decode.
    Malformed,
    /// Store error.
    Failed,
    /// Known or unknown type with nothing to do.
    NoOp,
}

pub struct EventProcessor {
    store: SharedStore,
    session: SharedSession,
    control: Arc<dyn ControlChannel>,
    fanout: Fanout,
}

impl EventProcessor {
    pub fn new(store: SharedStore, session: SharedSession, control: Arc<dyn ControlChannel>, fanout: Fanout) -> Self {
        Self { store, session, control, fanout }
    }

    pub fn handle_frame(&self, header: &str, payload: &[u8]) -> Disposition {
        let kind = EventKind::from_header(header);
        match kind {
            EventKind::Blank => Disposition::Ignored,
            EventKind::ProgramStatus => self.on_program_status(payload),
            _ if !self.admit() => Disposition::Inactive,
            EventKind::HostCheckInitiate => self.on_check_initiate(payload, CheckScope::Host),
            EventKind::ServiceCheckInitiate => self.on_check_initiate(payload, CheckScope::Service),
            EventKind::HostCheckProcessed => self.on_check_processed(payload, CheckScope::Host),
            EventKind::ServiceCheckProcessed => self.on_check_processed(payload, CheckScope::Service),
            // comments, notifications and state changes are not tracked yet
            EventKind::CommentAdd
            | EventKind::CommentDelete
            | EventKind::NotificationStart
            | EventKind::EventLoopEnd
            | EventKind::StateChange => {
                debug!(event = kind.as_str(), "event type not tracked");
                Disposition::NoOp
            }
            EventKind::Other(ref name) => {
                debug!(event = %name, payload = %String::from_utf8_lossy(payload), "unhandled event type");
                Disposition::NoOp
            }
        }
    }

    /// False while the replica is being rebuilt; the refused event is counted.
    fn admit(&self) -> bool {
        let mut session = self.session.lock();
        if !session.is_active() {
            session.record_dropped();
            return false;
        }
        true
    }

    fn decode<T: serde::de::DeserializeOwned>(kind: &'static str, payload: &[u8]) -> Option<T> {
        decode_payload(kind, payload)
            .map_err(|e| warn!(error = %e, "dropping frame"))
            .ok()
    }

    fn on_program_status(&self, payload: &[u8]) -> Disposition {
        let Some(status) = Self::decode::<ProgramStatus>("program_status", payload) else {
            return Disposition::Malformed;
        };

        let (outcome, active) = {
            let mut session = self.session.lock();
            let outcome = session.on_heartbeat(&status, self.control.as_ref());
            (outcome, session.is_active())
        };

        if active {
            let last_run = status
                .timestamp
                .and_then(|ts| ts.to_datetime())
                .and_then(|dt| dt.format(&Rfc3339).ok())
                .unwrap_or_else(|| "unknown".to_string());
            match self.store.count_services(&ServiceFilter::PendingChecks) {
                Ok(pending) => info!(last_run = %last_run, pending, "replica active"),
                Err(e) => error!(error = %e, "failed to count pending checks"),
            }
        } else {
            info!("replica inactive, waiting on snapshot");
        }

        let resync_requested = matches!(outcome, HeartbeatOutcome::EpochChanged { requested: true, .. });
        Disposition::Heartbeat { resync_requested }
    }

    /// Looks a key up, logging misses and store errors.
    fn locate(&self, key: &ServiceKey) -> Result<Service, Disposition> {
        match self.store.find_service(key) {
            Ok(Some(service)) => Ok(service),
            Ok(None) => {
                warn!(host = %key.host, service = %key.service, "no matching service, dropping event");
                Err(Disposition::Missing)
            }
            Err(e) => {
                error!(host = %key.host, service = %key.service, error = %e, "failed to find service");
                Err(Disposition::Failed)
            }
        }
    }

    fn persist(&self, key: &ServiceKey, update: &ServiceUpdate) -> bool {
        match self.store.update_service(key, update) {
            Ok(true) => true,
            Ok(false) => {
                warn!(host = %key.host, service = %key.service, "service vanished before update");
                false
            }
            Err(e) => {
                error!(host = %key.host, service = %key.service, ?update, error = %e, "failed to update service");
                false
            }
        }
    }

    fn on_check_initiate(&self, payload: &[u8], scope: CheckScope) -> Disposition {
        let Some(event) = Self::decode::<CheckInitiate>("check_initiate", payload) else {
            return Disposition::Malformed;
        };
        let Some(key) = event.key(scope) else {
            warn!(host = %event.host_name, "service check without service_description");
            return Disposition::Malformed;
        };
        let stored = match self.locate(&key) {
            Ok(stored) => stored,
            Err(disposition) => return disposition,
        };

        let update = ServiceUpdate::check_started(event.command_line.clone());
        if !self.persist(&key, &update) {
            return Disposition::Failed;
        }

        // checks of healthy entities are too frequent to announce
        let previous_state = event.last_state.unwrap_or(stored.state);
        let broadcast = previous_state != 0;
        if broadcast {
            self.fanout.broadcast(ServerEvent::CheckInit(key));
        }
        Disposition::Applied { broadcast }
    }

    fn on_check_processed(&self, payload: &[u8], scope: CheckScope) -> Disposition {
        let Some(event) = Self::decode::<CheckProcessed>("check_processed", payload) else {
            return Disposition::Malformed;
        };
        let Some(key) = event.key(scope) else {
            warn!(host = %event.host_name, "service check without service_description");
            return Disposition::Malformed;
        };
        let stored = match self.locate(&key) {
            Ok(stored) => stored,
            Err(disposition) => return disposition,
        };

        let update = event.to_update();
        if !self.persist(&key, &update) {
            return Disposition::Failed;
        }

        if event.state != event.last_state {
            info!(
                host = %key.host,
                service = %key.service,
                from = event.last_state,
                to = event.state,
                "state changed"
            );
        }

        let mut merged = stored.clone();
        update.apply(&mut merged);
        let broadcast = merged.state != stored.state || merged.priority() != stored.priority();
        if broadcast {
            self.fanout.broadcast(ServerEvent::StateUpdate(StateUpdate::new(merged.into_view())));
        }
        Disposition::Applied { broadcast }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlError;
    use crate::models::{Host, Service};
    use crate::priority::Priority;
    use crate::session::SessionTracker;
    use crate::state::new_state;
    use crate::store::{EntityStore, MemoryStore, UnavailableStore};
    use nagsync_devkit::{CheckResult, MockMqttClient, NagiosEventBuilder};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;

    impl ControlChannel for MockMqttClient {
        fn request_snapshot(&self) -> Result<(), ControlError> {
            self.try_publish("nagios/snapshot/request", br#"{"list_hosts":true}"#.to_vec())
                .map_err(|e| ControlError::Publish(e.to_string()))
        }
    }

    struct Fixture {
        processor: EventProcessor,
        store: SharedStore,
        session: SharedSession,
        control: MockMqttClient,
        deltas: Receiver<ServerEvent>,
    }

    impl Fixture {
        fn send(&self, header: &str, payload: serde_json::Value) -> Disposition {
            self.processor.handle_frame(header, &serde_json::to_vec(&payload).unwrap())
        }

        fn service(&self, host: &str, service: &str) -> Service {
            self.store.find_service(&ServiceKey::new(host, service)).unwrap().unwrap()
        }

        fn next_delta(&mut self) -> Option<ServerEvent> {
            match self.deltas.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => None,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
    }

    fn fixture_with(store: SharedStore, active: bool) -> Fixture {
        let session = new_state(SessionTracker::new());
        let control = MockMqttClient::new();
        let fanout = Fanout::new(32);
        let deltas = fanout.subscribe();
        let processor = EventProcessor::new(store.clone(), session.clone(), Arc::new(control.clone()), fanout);
        let fixture = Fixture { processor, store, session, control, deltas };
        if active {
            fixture.send("program_status", NagiosEventBuilder::program_status(100, 160));
            fixture.session.lock().complete_resync();
            fixture.control.clear();
        }
        fixture
    }

    fn seeded_store() -> SharedStore {
        let store = MemoryStore::shared();
        let warn = |host: &str, service: &str, state: i32| Service {
            host: host.into(),
            service: service.into(),
            state,
            last_state: state,
            current_attempt: 1,
            max_attempts: 3,
            ..Service::default()
        };
        store
            .replace_all(
                vec![Host { host: "web01".into(), ..Host::default() }],
                vec![warn("web01", "DOWN", 0), warn("web01", "HTTP", 1), warn("web01", "SSH", 0)],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_first_heartbeat_requests_snapshot() {
        let fx = fixture_with(seeded_store(), false);
        let d = fx.send("program_status", NagiosEventBuilder::program_status(100, 130));
        assert_eq!(d, Disposition::Heartbeat { resync_requested: true });

        let status = fx.session.lock().status();
        assert_eq!(status.epoch, Some(100));
        assert!(!status.active);
        assert_eq!(fx.control.find_messages_by_topic("nagios/snapshot/request").len(), 1);

        // same epoch again: nothing more is requested
        let d = fx.send("program_status", NagiosEventBuilder::program_status(100, 190));
        assert_eq!(d, Disposition::Heartbeat { resync_requested: false });
        assert_eq!(fx.control.get_published_messages().len(), 1);
    }

    #[test]
    fn test_inactive_replica_drops_events() {
        let mut fx = fixture_with(seeded_store(), false);
        let before = fx.service("web01", "HTTP");

        let d = fx.send(
            "service_check_processed",
            NagiosEventBuilder::service_check_processed("web01", "HTTP", CheckResult::new(2, 1)),
        );
        assert_eq!(d, Disposition::Inactive);
        let d = fx.send("host_check_initiate", NagiosEventBuilder::host_check_initiate("web01", Some(1), None));
        assert_eq!(d, Disposition::Inactive);

        assert_eq!(fx.service("web01", "HTTP"), before);
        assert!(!fx.service("web01", "DOWN").check_in_progress);
        assert!(fx.next_delta().is_none());
        assert_eq!(fx.session.lock().status().events_dropped, 2);

        // blank frames are ignored before the gate and not counted
        assert_eq!(fx.processor.handle_frame("", b"{}"), Disposition::Ignored);
        assert_eq!(fx.session.lock().status().events_dropped, 2);
    }

    #[test]
    fn test_blank_type_ignored_even_when_active() {
        let fx = fixture_with(seeded_store(), true);
        assert_eq!(fx.processor.handle_frame("", b"{}"), Disposition::Ignored);
        assert_eq!(fx.processor.handle_frame(" web01", b"not json"), Disposition::Ignored);
        assert_eq!(fx.session.lock().status().events_dropped, 0);
    }

    #[test]
    fn test_reserved_and_unknown_types_are_noops() {
        let mut fx = fixture_with(seeded_store(), true);
        for header in ["comment_add", "comment_delete", "notification_start", "eventloopend", "statechange", "downtime_start web01"] {
            assert_eq!(fx.send(header, serde_json::json!({"host_name": "web01"})), Disposition::NoOp);
        }
        assert!(fx.next_delta().is_none());
    }

    #[test]
    fn test_host_check_initiate_from_ok_is_silent() {
        let mut fx = fixture_with(seeded_store(), true);
        let d = fx.send(
            "host_check_initiate",
            NagiosEventBuilder::host_check_initiate("web01", Some(0), Some("check_ping -H 10.0.0.1")),
        );
        assert_eq!(d, Disposition::Applied { broadcast: false });
        assert!(fx.next_delta().is_none());

        let down = fx.service("web01", "DOWN");
        assert!(down.check_in_progress);
        assert_eq!(down.command_line.as_deref(), Some("check_ping -H 10.0.0.1"));
    }

    #[test]
    fn test_service_check_initiate_on_problem_announces() {
        let mut fx = fixture_with(seeded_store(), true);
        let d = fx.send(
            "service_check_initiate",
            NagiosEventBuilder::service_check_initiate("web01", "HTTP", Some(1), Some("check_http")),
        );
        assert_eq!(d, Disposition::Applied { broadcast: true });
        assert_eq!(fx.next_delta(), Some(ServerEvent::CheckInit(ServiceKey::new("web01", "HTTP"))));
        assert!(fx.service("web01", "HTTP").check_in_progress);
    }

    #[test]
    fn test_initiate_without_last_state_uses_stored_state() {
        let mut fx = fixture_with(seeded_store(), true);
        let d = fx.send("service_check_initiate", NagiosEventBuilder::service_check_initiate("web01", "HTTP", None, None));
        assert_eq!(d, Disposition::Applied { broadcast: true });
        let d = fx.send("service_check_initiate", NagiosEventBuilder::service_check_initiate("web01", "SSH", None, None));
        assert_eq!(d, Disposition::Applied { broadcast: false });
        assert!(matches!(fx.next_delta(), Some(ServerEvent::CheckInit(_))));
        assert!(fx.next_delta().is_none());
    }

    #[test]
    fn test_unknown_key_is_dropped() {
        let mut fx = fixture_with(seeded_store(), true);
        let d = fx.send("service_check_initiate", NagiosEventBuilder::service_check_initiate("web01", "NOPE", Some(2), None));
        assert_eq!(d, Disposition::Missing);
        let d = fx.send(
            "host_check_processed",
            NagiosEventBuilder::host_check_processed("ghost", CheckResult::new(1, 0)),
        );
        assert_eq!(d, Disposition::Missing);
        assert!(fx.store.find_service(&ServiceKey::host_check("ghost")).unwrap().is_none());
        assert!(fx.next_delta().is_none());
    }

    #[test]
    fn test_repeated_warning_updates_silently() {
        let mut fx = fixture_with(seeded_store(), true);
        fx.send("service_check_initiate", NagiosEventBuilder::service_check_initiate("web01", "HTTP", Some(1), None));
        fx.next_delta();

        let result = CheckResult::new(1, 1).attempt(2).output("HTTP WARNING: slow").checked_at(1700000300);
        let d = fx.send("service_check_processed", NagiosEventBuilder::service_check_processed("web01", "HTTP", result));
        assert_eq!(d, Disposition::Applied { broadcast: false });
        assert!(fx.next_delta().is_none());

        let http = fx.service("web01", "HTTP");
        assert!(!http.check_in_progress);
        assert_eq!(http.current_attempt, 2);
        assert_eq!(http.output.as_deref(), Some("HTTP WARNING: slow"));
        assert_eq!(http.last_check, 1700000300);
        assert_eq!(http.last_time_ok, 0);
    }

    #[test]
    fn test_recovery_broadcasts_merged_record() {
        let mut fx = fixture_with(seeded_store(), true);
        let result = CheckResult::new(0, 1).output("HTTP OK").checked_at(1700000400);
        let d = fx.send("service_check_processed", NagiosEventBuilder::service_check_processed("web01", "HTTP", result));
        assert_eq!(d, Disposition::Applied { broadcast: true });

        let Some(ServerEvent::StateUpdate(update)) = fx.next_delta() else {
            panic!("expected a state update");
        };
        assert_eq!(update.host, "web01");
        assert_eq!(update.service, "HTTP");
        assert_eq!(update.data.priority, Some(Priority::Recovered));
        assert_eq!(update.data.service.last_time_ok, 1700000400);
        // broadcast and replica hold the same values
        assert_eq!(update.data.service, fx.service("web01", "HTTP"));
    }

    #[test]
    fn test_replayed_result_broadcasts_once() {
        let mut fx = fixture_with(seeded_store(), true);
        let event = NagiosEventBuilder::service_check_processed("web01", "SSH", CheckResult::new(2, 0).attempt(1));

        assert_eq!(fx.send("service_check_processed", event.clone()), Disposition::Applied { broadcast: true });
        assert_eq!(fx.send("service_check_processed", event), Disposition::Applied { broadcast: false });

        let Some(ServerEvent::StateUpdate(update)) = fx.next_delta() else {
            panic!("expected a state update");
        };
        assert_eq!(update.data.priority, Some(Priority::SoftCritical));
        assert!(fx.next_delta().is_none());
    }

    #[test]
    fn test_soft_to_hard_escalation_broadcasts() {
        let mut fx = fixture_with(seeded_store(), true);
        let first = NagiosEventBuilder::service_check_processed("web01", "SSH", CheckResult::new(2, 0).attempt(1));
        assert_eq!(fx.send("service_check_processed", first), Disposition::Applied { broadcast: true });
        fx.next_delta();

        // same state, but the last attempt makes it hard
        let last = NagiosEventBuilder::service_check_processed("web01", "SSH", CheckResult::new(2, 2).attempt(3));
        assert_eq!(fx.send("service_check_processed", last.clone()), Disposition::Applied { broadcast: true });
        let Some(ServerEvent::StateUpdate(update)) = fx.next_delta() else {
            panic!("expected a state update");
        };
        assert_eq!(update.data.priority, Some(Priority::HardCritical));
        assert_eq!(fx.service("web01", "SSH").priority(), Some(Priority::HardCritical));

        // a replay of the hard result changes nothing
        assert_eq!(fx.send("service_check_processed", last), Disposition::Applied { broadcast: false });
        assert!(fx.next_delta().is_none());
    }

    #[test]
    fn test_repeated_ok_is_silent() {
        let mut fx = fixture_with(seeded_store(), true);
        let d = fx.send(
            "service_check_processed",
            NagiosEventBuilder::service_check_processed("web01", "SSH", CheckResult::new(0, 0).checked_at(42)),
        );
        assert_eq!(d, Disposition::Applied { broadcast: false });
        assert!(fx.next_delta().is_none());
        assert_eq!(fx.service("web01", "SSH").last_time_ok, 42);
    }

    #[test]
    fn test_host_down_uses_down_pseudo_service() {
        let mut fx = fixture_with(seeded_store(), true);
        let d = fx.send("host_check_processed", NagiosEventBuilder::host_check_processed("web01", CheckResult::new(1, 0)));
        assert_eq!(d, Disposition::Applied { broadcast: true });
        let Some(ServerEvent::StateUpdate(update)) = fx.next_delta() else {
            panic!("expected a state update");
        };
        assert_eq!(update.service, "DOWN");
        assert_eq!(update.data.priority, Some(Priority::Down));
    }

    #[test]
    fn test_malformed_payloads_are_dropped() {
        let fx = fixture_with(seeded_store(), true);
        assert_eq!(fx.processor.handle_frame("service_check_processed", b"{oops"), Disposition::Malformed);
        assert_eq!(fx.processor.handle_frame("program_status", b"{}"), Disposition::Malformed);
        // a service event needs its description
        assert_eq!(
            fx.send("service_check_initiate", serde_json::json!({"host_name": "web01"})),
            Disposition::Malformed
        );
    }

    #[test]
    fn test_store_errors_are_contained() {
        let mut fx = fixture_with(Arc::new(UnavailableStore), true);
        let d = fx.send(
            "service_check_processed",
            NagiosEventBuilder::service_check_processed("web01", "HTTP", CheckResult::new(2, 0)),
        );
        assert_eq!(d, Disposition::Failed);
        assert!(fx.next_delta().is_none());
        // heartbeats still work while the store is down
        let d = fx.send("program_status", NagiosEventBuilder::program_status(100, 500));
        assert_eq!(d, Disposition::Heartbeat { resync_requested: false });
    }
}
