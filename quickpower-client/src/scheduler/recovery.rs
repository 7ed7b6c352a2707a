use std::sync::Arc;
use std::time::Duration;

use quickpower_shared::domain::duration_ms;
use quickpower_shared::settings::ScheduledMirror;
use quickpower_shared::{PendingAction, Settings};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{Caller, ScheduleLimits, Scheduler, SchedulerEvent};
use crate::platform::PowerControl;
use crate::store::SettingsStore;

/// What a persisted record means for a freshly started process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Nothing,
    /// Still in the future; `pending.initial_duration_ms` is the time left now.
    Resume {
        pending: PendingAction,
        remaining: Duration,
    },
    /// Expired or half-written; the mirror must be cleared.
    Discard { reason: &'static str },
}

pub fn reconcile(settings: &Settings, now: OffsetDateTime) -> Recovery {
    match settings.scheduled() {
        ScheduledMirror::Empty => Recovery::Nothing,
        ScheduledMirror::Partial => Recovery::Discard {
            reason: "incomplete record",
        },
        ScheduledMirror::Present {
            target_time,
            action,
        } => {
            let mut pending = PendingAction {
                target_time,
                action,
                initial_duration_ms: 0,
            };
            let remaining = pending.remaining_at(now);
            pending.initial_duration_ms = duration_ms(remaining);
            if pending.initial_duration_ms == 0 {
                return Recovery::Discard { reason: "expired" };
            }
            Recovery::Resume { pending, remaining }
        }
    }
}

impl Scheduler {
    /// Build the scheduler and pick up whatever the last run left in the store.
    /// Self-timed actions are already registered with the OS and are only
    /// tracked again; a hibernate gets its trigger re-armed.
    pub async fn recover(
        power: Arc<dyn PowerControl>,
        store: Arc<dyn SettingsStore>,
        limits: ScheduleLimits,
    ) -> Self {
        Self::new(power, store, limits).restore_persisted().await
    }

    /// Resume the record left in the store by a previous run, if any.
    pub async fn restore_persisted(self) -> Self {
        let settings = match self.inner.store.load() {
            Ok(s) => s,
            Err(e) => {
                warn!(error=%e, "settings unreadable at start-up; assuming nothing pending");
                return self;
            }
        };
        let now = self.inner.clock.now();
        self.restore(reconcile(&settings, now)).await;
        self
    }

    async fn restore(&self, recovery: Recovery) {
        let mut slot = self.inner.slot.lock().await;
        match recovery {
            Recovery::Nothing => debug!("no pending action to recover"),
            Recovery::Discard { reason } => {
                info!(reason, "discarding persisted schedule");
                self.inner.persist(None);
            }
            Recovery::Resume { pending, remaining } => {
                info!(
                    action=%pending.action,
                    remaining_ms = pending.initial_duration_ms,
                    "resuming pending action"
                );
                self.inner.install(&mut slot, pending, remaining, false);
            }
        }
    }

    /// Follow changes another process made to the persisted schedule.
    ///
    /// A removed record stops local tracking. A replacement self-timed action
    /// is adopted for display; a replacement hibernate belongs to the process
    /// that armed it, so this one stops tracking. Nothing here talks to the OS
    /// or writes the store. Skipped while a schedule or cancel is in flight.
    pub async fn resync(&self) {
        let Ok(_op) = self.inner.op.try_lock() else {
            return;
        };
        let settings = match self.inner.store.load() {
            Ok(s) => s,
            Err(e) => {
                debug!(error=%e, "resync: settings unreadable; skipping");
                return;
            }
        };

        let mut slot = self.inner.slot.lock().await;
        let Some(armed) = slot.armed.as_ref() else {
            return;
        };
        if !armed.mirrored {
            return;
        }
        if settings.scheduled_time == Some(armed.pending.target_time)
            && settings.scheduled_action == Some(armed.pending.action)
        {
            return;
        }

        let previous = slot.disarm(Caller::Outside);
        match reconcile(&settings, self.inner.clock.now()) {
            Recovery::Resume { pending, remaining } if pending.action.is_self_timed() => {
                info!(action=%pending.action, "pending action replaced elsewhere; following it");
                self.inner.install(&mut slot, pending, remaining, false);
            }
            _ => {
                if let Some(p) = previous {
                    info!(action=%p.action, "pending action changed elsewhere; no longer tracking");
                }
                self.inner.emit(SchedulerEvent::StatusChanged(None));
            }
        }
    }
}
