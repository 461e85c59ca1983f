/**
 * PRIORITY - Severity buckets for hosts and services
 *
 * ROLE: maps (host-check?, state, attempts, acknowledged) onto a fixed
 * priority code, and exposes the code -> CSS-ish label table the dashboard
 * uses to colour rows.
 *
 * The table is evaluated top to bottom, first match wins:
 *   state 0                      -> 0 recovered
 *   host check ("DOWN")          -> 9 down, 2 when acknowledged
 *   acknowledged service         -> 1
 *   hard (attempt == max)        -> 7 critical/unknown, 5 warning
 *   soft                         -> 8 critical/unknown, 6 warning
 *
 * Codes 3 ("hard notice") and 4 ("hard status") are published in the label
 * table but never produced by `classify`.
 */

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Recovered = 0,
    Acknowledged = 1,
    DownAcknowledged = 2,
    Notice = 3,
    Status = 4,
    HardWarning = 5,
    SoftWarning = 6,
    HardCritical = 7,
    SoftCritical = 8,
    Down = 9,
}

impl Priority {
    pub const ALL: [Priority; 10] = [
        Priority::Recovered,
        Priority::Acknowledged,
        Priority::DownAcknowledged,
        Priority::Notice,
        Priority::Status,
        Priority::HardWarning,
        Priority::SoftWarning,
        Priority::HardCritical,
        Priority::SoftCritical,
        Priority::Down,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Recovered => "hard recovered",
            Priority::Acknowledged | Priority::DownAcknowledged => "hard acknowledged",
            Priority::Notice => "hard notice",
            Priority::Status => "hard status",
            Priority::HardWarning => "hard warning",
            Priority::SoftWarning => "soft warning",
            Priority::HardCritical => "hard critical",
            Priority::SoftCritical => "soft critical",
            Priority::Down => "hard down",
        }
    }
}

// Serialised as the bare numeric code, the form dashboards index the label table with.
impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Classify one host or service check result.
///
/// Returns `None` when no row of the table matches (a non-zero state outside
/// 1..=3). Callers must keep that distinct from `Some(Priority::Recovered)`.
pub fn classify(
    is_host: bool,
    state: i32,
    current_attempt: i32,
    max_attempts: i32,
    acknowledged: bool,
) -> Option<Priority> {
    if state == 0 {
        return Some(Priority::Recovered);
    }
    if is_host {
        return Some(if acknowledged {
            Priority::DownAcknowledged
        } else {
            Priority::Down
        });
    }
    if acknowledged {
        return Some(Priority::Acknowledged);
    }

    let hard = current_attempt == max_attempts;
    match (state, hard) {
        (2 | 3, true) => Some(Priority::HardCritical),
        (1, true) => Some(Priority::HardWarning),
        (2 | 3, false) => Some(Priority::SoftCritical),
        (1, false) => Some(Priority::SoftWarning),
        _ => None,
    }
}

/// Full code -> label table, reserved codes included.
pub fn priority_map() -> BTreeMap<u8, &'static str> {
    Priority::ALL.iter().map(|p| (p.code(), p.label())).collect()
}
