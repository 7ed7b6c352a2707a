use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// Power transition the user can schedule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Shutdown,
    Restart,
    Hibernate,
}

impl PowerAction {
    pub const ALL: [PowerAction; 3] = [
        PowerAction::Shutdown,
        PowerAction::Restart,
        PowerAction::Hibernate,
    ];

    /// Self-timed actions are handed to the OS together with their delay; the OS
    /// owns the countdown and acts even if this process is gone.
    pub fn is_self_timed(self) -> bool {
        matches!(self, PowerAction::Shutdown | PowerAction::Restart)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::Shutdown => "shutdown",
            PowerAction::Restart => "restart",
            PowerAction::Hibernate => "hibernate",
        }
    }

    /// Human readable label used in notifications and the countdown line.
    pub fn label(self) -> &'static str {
        match self {
            PowerAction::Shutdown => "Shutdown",
            PowerAction::Restart => "Restart",
            PowerAction::Hibernate => "Hibernate",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown power action '{0}' (expected shutdown, restart or hibernate)")]
pub struct UnknownAction(pub String);

impl FromStr for PowerAction {
    type Err = UnknownAction;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        PowerAction::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// The single in-flight scheduled power action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    #[serde(with = "time::serde::rfc3339")]
    pub target_time: OffsetDateTime,
    pub action: PowerAction,
    /// Span originally requested; denominator of the completion ratio.
    pub initial_duration_ms: u64,
}

impl PendingAction {
    pub fn new(action: PowerAction, delay: Duration, now: OffsetDateTime) -> Self {
        Self {
            target_time: now + delay,
            action,
            initial_duration_ms: duration_ms(delay),
        }
    }

    /// Time left until `target_time`, zero once it has passed.
    pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(self.target_time - now).unwrap_or(Duration::ZERO)
    }

    /// Completion ratio in `[0, 1]`: 1.0 right after scheduling, 0.0 at expiry.
    pub fn ratio(&self, remaining_ms: u64) -> f64 {
        if self.initial_duration_ms == 0 {
            return 0.0;
        }
        (remaining_ms as f64 / self.initial_duration_ms as f64).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            time: format_rfc3339(self.target_time),
            action: self.action,
        }
    }
}

/// Payload of the `status-changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// RFC 3339 / ISO-8601 target time in UTC.
    pub time: String,
    pub action: PowerAction,
}

/// Unit the user typed the delay in; stored as `lastDurationUnit`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    #[default]
    Minutes,
    Hours,
}

impl DurationUnit {
    pub fn to_minutes(self, value: f64) -> f64 {
        match self {
            DurationUnit::Minutes => value,
            DurationUnit::Hours => value * 60.0,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

pub fn format_rfc3339(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
