use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::domain::{DurationUnit, PendingAction, PowerAction, Theme};

/// Key written by releases that only knew how to shut down.
const LEGACY_SHUTDOWN_TIME: &str = "shutdownTime";

fn default_last_duration_value() -> f64 {
    30.0
}

/// The persisted settings record (`settings.json`).
///
/// `scheduled_time` / `scheduled_action` mirror the pending action; both are
/// omitted from the file when nothing is pending. Keys this version does not
/// know about are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_last_duration_value")]
    pub last_duration_value: f64,
    #[serde(default)]
    pub last_duration_unit: DurationUnit,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub scheduled_time: Option<OffsetDateTime>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_action"
    )]
    pub scheduled_action: Option<PowerAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            last_duration_value: default_last_duration_value(),
            last_duration_unit: DurationUnit::default(),
            scheduled_time: None,
            scheduled_action: None,
            extra: Map::new(),
        }
    }
}

/// What the mirror fields say about a pending action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledMirror {
    Empty,
    Present {
        target_time: OffsetDateTime,
        action: PowerAction,
    },
    /// Only one of the two keys survived; cannot be trusted.
    Partial,
}

impl Settings {
    /// Parse a record and upgrade legacy keys.
    pub fn from_json_str(data: &str) -> Result<Self, serde_json::Error> {
        let mut settings: Settings = serde_json::from_str(data)?;
        settings.migrate_legacy();
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn migrate_legacy(&mut self) {
        let Some(legacy) = self.extra.remove(LEGACY_SHUTDOWN_TIME) else {
            return;
        };
        if self.scheduled_time.is_some() {
            return;
        }
        let parsed = legacy
            .as_str()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());
        if let Some(at) = parsed {
            self.scheduled_time = Some(at);
            self.scheduled_action.get_or_insert(PowerAction::Shutdown);
        }
    }

    pub fn scheduled(&self) -> ScheduledMirror {
        match (self.scheduled_time, self.scheduled_action) {
            (None, None) => ScheduledMirror::Empty,
            (Some(target_time), Some(action)) => ScheduledMirror::Present {
                target_time,
                action,
            },
            _ => ScheduledMirror::Partial,
        }
    }

    /// Replace the mirror wholesale; `None` removes both keys.
    pub fn set_scheduled(&mut self, pending: Option<&PendingAction>) {
        self.scheduled_time = pending.map(|p| p.target_time);
        self.scheduled_action = pending.map(|p| p.action);
    }
}

fn lenient_action<'de, D>(deserializer: D) -> Result<Option<PowerAction>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::datetime;

    #[test]
    fn empty_object_yields_defaults() {
        let s = Settings::from_json_str("{}").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.scheduled(), ScheduledMirror::Empty);
    }

    #[test]
    fn mirror_round_trips_through_reserved_keys() {
        let mut s = Settings::default();
        let p = PendingAction::new(
            PowerAction::Restart,
            Duration::from_secs(600),
            datetime!(2025-06-01 20:00 UTC),
        );
        s.set_scheduled(Some(&p));
        let json: Value = serde_json::from_str(&s.to_json_string().unwrap()).unwrap();
        assert_eq!(json["scheduledTime"], "2025-06-01T20:10:00Z");
        assert_eq!(json["scheduledAction"], "restart");
        assert_eq!(json["lastDurationValue"], 30.0);
        assert_eq!(json["lastDurationUnit"], "minutes");

        s.set_scheduled(None);
        let json: Value = serde_json::from_str(&s.to_json_string().unwrap()).unwrap();
        assert!(json.get("scheduledTime").is_none());
        assert!(json.get("scheduledAction").is_none());
    }

    #[test]
    fn reads_timestamps_written_by_javascript() {
        let s = Settings::from_json_str(
            r#"{"theme":"dark","scheduledTime":"2025-06-01T20:10:00.000Z","scheduledAction":"hibernate"}"#,
        )
        .unwrap();
        assert_eq!(s.theme, Theme::Dark);
        assert_eq!(
            s.scheduled(),
            ScheduledMirror::Present {
                target_time: datetime!(2025-06-01 20:10 UTC),
                action: PowerAction::Hibernate,
            }
        );
    }

    #[test]
    fn legacy_shutdown_time_is_migrated() {
        let s = Settings::from_json_str(r#"{"shutdownTime":"2025-06-01T20:10:00Z"}"#).unwrap();
        assert!(!s.extra.contains_key("shutdownTime"));
        assert_eq!(s.scheduled_action, Some(PowerAction::Shutdown));
        assert_eq!(s.scheduled_time, Some(datetime!(2025-06-01 20:10 UTC)));
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let s = Settings::from_json_str(r#"{"windowX":120,"autoStart":true}"#).unwrap();
        let json: Value = serde_json::from_str(&s.to_json_string().unwrap()).unwrap();
        assert_eq!(json["windowX"], 120);
        assert_eq!(json["autoStart"], true);
    }

    #[test]
    fn unknown_action_leaves_a_partial_mirror() {
        let s = Settings::from_json_str(
            r#"{"scheduledTime":"2025-06-01T20:10:00Z","scheduledAction":"sleep"}"#,
        )
        .unwrap();
        assert_eq!(s.scheduled_action, None);
        assert_eq!(s.scheduled(), ScheduledMirror::Partial);
    }
}
