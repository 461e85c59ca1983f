/**
 * SESSION TRACKER - Upstream epoch and replica admission gate
 *
 * ROLE: remembers which run of the monitoring process (its `program_start`)
 * the replica was built from. A heartbeat announcing a different start time
 * means upstream restarted: the replica is closed for business (`active =
 * false`) and a snapshot is requested. The importer reopens it.
 *
 *   none        --heartbeat(E)-->           inactive(E) + request
 *   inactive(E) --import complete-->        active(E)
 *   active(E)   --heartbeat(E' != E)-->     inactive(E') + request
 *
 * Events arriving while inactive are dropped, not queued (see DESIGN.md).
 */

use crate::control::ControlChannel;
use crate::events::ProgramStatus;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Same epoch as the replica.
    Unchanged,
    /// New epoch; the replica was deactivated and a resync requested.
    EpochChanged { previous: Option<i64>, epoch: i64, requested: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub epoch: Option<i64>,
    pub active: bool,
    pub last_heartbeat: Option<i64>,
    pub resync_requests: u64,
    pub resyncs_completed: u64,
    pub events_dropped: u64,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    epoch: Option<i64>,
    active: bool,
    last_heartbeat: Option<i64>,
    resync_requests: u64,
    resyncs_completed: u64,
    events_dropped: u64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Checks a heartbeat against the current epoch and asks for a snapshot
    /// through `control` when upstream restarted.
    pub fn on_heartbeat(&mut self, status: &ProgramStatus, control: &dyn ControlChannel) -> HeartbeatOutcome {
        if let Some(ts) = status.timestamp {
            self.last_heartbeat = Some(ts.tv_sec);
        }
        if self.epoch == Some(status.program_start) {
            return HeartbeatOutcome::Unchanged;
        }

        self.active = false;
        warn!(
            previous = ?self.epoch,
            epoch = status.program_start,
            "session does not match the replica, rebuilding"
        );

        let requested = match control.request_snapshot() {
            Ok(()) => {
                self.resync_requests += 1;
                true
            }
            Err(e) => {
                error!(error = %e, "failed to request snapshot");
                false
            }
        };

        let previous = self.epoch.replace(status.program_start);
        HeartbeatOutcome::EpochChanged { previous, epoch: status.program_start, requested }
    }

    /// Called by the importer once the replica has been repopulated.
    pub fn complete_resync(&mut self) {
        self.active = true;
        self.resyncs_completed += 1;
        info!(epoch = ?self.epoch, "replica rebuilt, event processing active");
    }

    pub fn record_dropped(&mut self) {
        self.events_dropped += 1;
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            epoch: self.epoch,
            active: self.active,
            last_heartbeat: self.last_heartbeat,
            resync_requests: self.resync_requests,
            resyncs_completed: self.resyncs_completed,
            events_dropped: self.events_dropped,
        }
    }
}
