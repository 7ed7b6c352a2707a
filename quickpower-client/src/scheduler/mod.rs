use std::sync::{Arc, Weak};
use std::time::Duration;

use quickpower_shared::domain::{UnknownAction, duration_ms, now_utc};
use quickpower_shared::{PendingAction, PowerAction, StatusSnapshot};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::platform::PowerControl;
use crate::store::{SettingsStore, update_settings};

pub mod recovery;

const TICK_PERIOD: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("duration must be greater than zero")]
    NonPositiveDuration,
    #[error("duration exceeds the maximum of {max_minutes} minutes")]
    DurationOutOfRange { max_minutes: u32 },
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("the operating system rejected the request: {0}")]
    OsRejected(String),
    #[error("another schedule or cancel request is in progress")]
    Busy,
}

impl From<UnknownAction> for ScheduleError {
    fn from(e: UnknownAction) -> Self {
        ScheduleError::UnknownAction(e.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    #[error("another schedule or cancel request is in progress")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(PowerAction),
    NothingPending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// The pending action changed. `None` means idle.
    StatusChanged(Option<StatusSnapshot>),
    /// Countdown progress; `ratio` is 1.0 right after scheduling and 0.0 at expiry.
    Tick { remaining_ms: u64, ratio: f64 },
    /// The deferred hibernate request failed; state has already been cleared.
    DeferredFailed { action: PowerAction, detail: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleLimits {
    pub max_duration_minutes: u32,
}

impl Default for ScheduleLimits {
    fn default() -> Self {
        Self {
            max_duration_minutes: 60 * 24 * 7,
        }
    }
}

impl ScheduleLimits {
    /// Turn a user-supplied minute count into a delay, rejecting anything
    /// non-positive (NaN included) or above the configured maximum.
    pub fn validate(&self, minutes: f64) -> Result<Duration, ScheduleError> {
        if !(minutes > 0.0) {
            return Err(ScheduleError::NonPositiveDuration);
        }
        if minutes > f64::from(self.max_duration_minutes) {
            return Err(ScheduleError::DurationOutOfRange {
                max_minutes: self.max_duration_minutes,
            });
        }
        let ms = (minutes * 60_000.0).round() as u64;
        if ms == 0 {
            return Err(ScheduleError::NonPositiveDuration);
        }
        Ok(Duration::from_millis(ms))
    }
}

/// Wall-clock source for countdowns and expiry. Remaining time is always
/// `target_time - now`, so a suspend/resume cannot delay the countdown.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        now_utc()
    }
}

/// Which of the scheduler's own tasks is calling into the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    Outside,
    Ticker,
    Trigger,
}

#[derive(Debug)]
struct Armed {
    pending: PendingAction,
    /// Last countdown value reported; ticks never go above it.
    last_remaining_ms: u64,
    /// Whether the store holds this exact action.
    mirrored: bool,
}

#[derive(Debug, Default)]
struct Slot {
    armed: Option<Armed>,
    /// Bumped whenever the armed action changes; tasks carry the value they were spawned with.
    generation: u64,
    ticker: Option<JoinHandle<()>>,
    trigger: Option<JoinHandle<()>>,
}

impl Slot {
    fn current(&self, generation: u64) -> Option<&Armed> {
        self.armed.as_ref().filter(|_| self.generation == generation)
    }

    fn current_mut(&mut self, generation: u64) -> Option<&mut Armed> {
        let same = self.generation == generation;
        self.armed.as_mut().filter(|_| same)
    }

    /// Forget the armed action and stop its tasks. The calling task, if it
    /// is one of ours, is left to return on its own.
    fn disarm(&mut self, caller: Caller) -> Option<PendingAction> {
        self.generation = self.generation.wrapping_add(1);
        if let Some(h) = self.ticker.take()
            && caller != Caller::Ticker
        {
            h.abort();
        }
        if let Some(h) = self.trigger.take()
            && caller != Caller::Trigger
        {
            h.abort();
        }
        self.armed.take().map(|a| a.pending)
    }
}

struct Inner {
    power: Arc<dyn PowerControl>,
    store: Arc<dyn SettingsStore>,
    limits: ScheduleLimits,
    clock: Arc<dyn Clock>,
    slot: Mutex<Slot>,
    /// Single-slot guard serializing operations that talk to the OS.
    op: Mutex<()>,
    events: broadcast::Sender<SchedulerEvent>,
}

/// Owner of the single pending power action. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// An idle scheduler. Use [`Scheduler::recover`] at start-up instead to
    /// pick up a schedule persisted by a previous run.
    pub fn new(
        power: Arc<dyn PowerControl>,
        store: Arc<dyn SettingsStore>,
        limits: ScheduleLimits,
    ) -> Self {
        Self::with_clock(power, store, limits, Arc::new(SystemClock))
    }

    pub fn with_clock(
        power: Arc<dyn PowerControl>,
        store: Arc<dyn SettingsStore>,
        limits: ScheduleLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                power,
                store,
                limits,
                clock,
                slot: Mutex::new(Slot::default()),
                op: Mutex::new(()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Schedule `action` to happen in `minutes`, replacing whatever was pending.
    pub async fn schedule(
        &self,
        minutes: f64,
        action: PowerAction,
    ) -> Result<PendingAction, ScheduleError> {
        let delay = self.inner.limits.validate(minutes)?;
        let _op = self.inner.op.try_lock().map_err(|_| ScheduleError::Busy)?;

        let previous = self.inner.slot.lock().await.disarm(Caller::Outside);
        if let Some(prev) = &previous {
            info!(previous=%prev.action, next=%action, "replacing pending action");
            if prev.action.is_self_timed()
                && let Err(e) = self.inner.power.cancel_pending_timed_action().await
            {
                warn!(error=%e, "failed to cancel previous OS timer; continuing");
            }
        }

        let seconds = u64::try_from(delay.as_millis().div_ceil(1000)).unwrap_or(u64::MAX);
        let registered = match action {
            PowerAction::Shutdown => self.inner.power.request_timed_shutdown(seconds).await,
            PowerAction::Restart => self.inner.power.request_timed_restart(seconds).await,
            // Hibernate has no OS-side timer; the trigger task issues it at the deadline.
            PowerAction::Hibernate => Ok(()),
        };
        if let Err(e) = registered {
            error!(%action, seconds, error=%e, "OS rejected the scheduled action");
            if previous.is_some() {
                let _slot = self.inner.slot.lock().await;
                self.inner.persist(None);
                self.inner.emit(SchedulerEvent::StatusChanged(None));
            }
            return Err(ScheduleError::OsRejected(e.to_string()));
        }

        let pending = PendingAction::new(action, delay, self.inner.clock.now());
        info!(%action, target=%pending.snapshot().time, "action scheduled");
        let mut slot = self.inner.slot.lock().await;
        self.inner.install(&mut slot, pending.clone(), delay, true);
        Ok(pending)
    }

    /// Cancel the pending action. Succeeds when nothing is pending.
    pub async fn cancel(&self) -> Result<CancelOutcome, CancelError> {
        let _op = self.inner.op.try_lock().map_err(|_| CancelError::Busy)?;

        let previous = self.inner.slot.lock().await.disarm(Caller::Outside);
        match &previous {
            Some(prev) if prev.action.is_self_timed() => {
                if let Err(e) = self.inner.power.cancel_pending_timed_action().await {
                    warn!(action=%prev.action, error=%e, "OS cancellation failed; clearing anyway");
                }
            }
            Some(prev) => debug!(action=%prev.action, "deferred trigger aborted"),
            None => debug!("cancel requested while idle"),
        }

        let _slot = self.inner.slot.lock().await;
        self.inner.persist(None);
        self.inner.emit(SchedulerEvent::StatusChanged(None));
        Ok(match previous {
            Some(prev) => {
                info!(action=%prev.action, "pending action cancelled");
                CancelOutcome::Cancelled(prev.action)
            }
            None => CancelOutcome::NothingPending,
        })
    }

    /// The pending action, or `None` once its target time has passed.
    pub async fn state(&self) -> Option<PendingAction> {
        let now = self.inner.clock.now();
        let slot = self.inner.slot.lock().await;
        slot.armed
            .as_ref()
            .filter(|a| !a.pending.remaining_at(now).is_zero())
            .map(|a| a.pending.clone())
    }

    /// Time left on the pending action's countdown; `None` when nothing is
    /// pending or the target time has passed.
    pub async fn remaining(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        let slot = self.inner.slot.lock().await;
        slot.armed
            .as_ref()
            .map(|a| a.pending.remaining_at(now))
            .filter(|d| !d.is_zero())
    }

    /// Stop the ticker and trigger. OS timers and the persisted record are left
    /// alone so the next start can recover them.
    pub async fn shutdown(&self) {
        let mut slot = self.inner.slot.lock().await;
        if let Some(p) = slot.disarm(Caller::Outside) {
            debug!(action=%p.action, "scheduler disposed with a pending action");
        }
    }
}

impl Inner {
    fn emit(&self, event: SchedulerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Mirror `pending` into the store. Failures are logged and never undo
    /// the in-memory transition.
    fn persist(&self, pending: Option<&PendingAction>) -> bool {
        match update_settings(self.store.as_ref(), |s| s.set_scheduled(pending)) {
            Ok(()) => true,
            Err(e) => {
                error!(error=%e, "failed to persist schedule");
                false
            }
        }
    }

    /// Arm `pending` with `remaining` left on its countdown and start its tasks.
    fn install(
        self: &Arc<Self>,
        slot: &mut Slot,
        pending: PendingAction,
        remaining: Duration,
        persist: bool,
    ) {
        if slot.armed.is_some() {
            slot.disarm(Caller::Outside);
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        let mirrored = !persist || self.persist(Some(&pending));
        let snapshot = pending.snapshot();
        let self_timed = pending.action.is_self_timed();
        slot.armed = Some(Armed {
            pending,
            last_remaining_ms: duration_ms(remaining),
            mirrored,
        });
        self.emit(SchedulerEvent::StatusChanged(Some(snapshot)));

        slot.ticker = Some(tokio::spawn(run_ticker(Arc::downgrade(self), generation)));
        if !self_timed {
            slot.trigger = Some(tokio::spawn(run_trigger(Arc::downgrade(self), generation)));
        }
    }

    /// Wall-clock time left on the action armed as `generation`.
    async fn time_left(&self, generation: u64) -> Option<Duration> {
        let now = self.clock.now();
        let slot = self.slot.lock().await;
        slot.current(generation).map(|a| a.pending.remaining_at(now))
    }

    /// One countdown step. Returns false once the ticker should stop.
    async fn tick(&self, generation: u64) -> bool {
        let now = self.clock.now();
        let mut slot = self.slot.lock().await;
        let Some(armed) = slot.current_mut(generation) else {
            return false;
        };
        let left = duration_ms(armed.pending.remaining_at(now));
        let remaining_ms = left.min(armed.last_remaining_ms);
        armed.last_remaining_ms = remaining_ms;
        let ratio = armed.pending.ratio(remaining_ms);
        let action = armed.pending.action;
        self.emit(SchedulerEvent::Tick {
            remaining_ms,
            ratio,
        });
        if remaining_ms > 0 {
            return true;
        }
        if action.is_self_timed() {
            // The OS owns this timer and is acting on it now.
            info!(%action, "deadline reached; OS is carrying out the action");
            slot.disarm(Caller::Ticker);
            self.persist(None);
            self.emit(SchedulerEvent::StatusChanged(None));
        }
        false
    }

    /// Deferred hibernate at its deadline. Waits for in-flight operations
    /// instead of rejecting, then re-checks that it is still current.
    async fn fire_deferred(&self, generation: u64) {
        let _op = self.op.lock().await;
        let action = {
            let mut slot = self.slot.lock().await;
            let Some(armed) = slot.current(generation) else {
                debug!("deferred trigger superseded");
                return;
            };
            let action = armed.pending.action;
            if armed.mirrored && !self.mirror_matches(&armed.pending) {
                info!(%action, "pending action changed elsewhere; not firing");
                slot.disarm(Caller::Trigger);
                self.emit(SchedulerEvent::StatusChanged(None));
                return;
            }
            action
        };

        info!(%action, "deadline reached; requesting hibernate");
        let result = self.power.request_immediate_hibernate().await;

        let mut slot = self.slot.lock().await;
        if slot.generation == generation {
            slot.disarm(Caller::Trigger);
        }
        self.persist(None);
        self.emit(SchedulerEvent::StatusChanged(None));
        if let Err(e) = result {
            error!(%action, error=%e, "deferred hibernate failed");
            self.emit(SchedulerEvent::DeferredFailed {
                action,
                detail: e.to_string(),
            });
        }
    }

    /// Whether the store still describes `pending`. An unreadable store counts as a match.
    fn mirror_matches(&self, pending: &PendingAction) -> bool {
        match self.store.load() {
            Ok(settings) => {
                settings.scheduled_time == Some(pending.target_time)
                    && settings.scheduled_action == Some(pending.action)
            }
            Err(e) => {
                warn!(error=%e, "could not re-read settings; assuming schedule unchanged");
                true
            }
        }
    }
}

async fn run_ticker(inner: Weak<Inner>, generation: u64) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.tick(generation).await {
            break;
        }
    }
}

/// Sleeps in steps of at most one tick so a wall-clock jump is noticed.
async fn run_trigger(inner: Weak<Inner>, generation: u64) {
    loop {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let Some(left) = strong.time_left(generation).await else {
            return;
        };
        if left.is_zero() {
            strong.fire_deferred(generation).await;
            return;
        }
        drop(strong);
        tokio::time::sleep(left.min(TICK_PERIOD)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_reject_out_of_range_minutes() {
        let limits = ScheduleLimits::default();
        assert_eq!(limits.validate(0.0), Err(ScheduleError::NonPositiveDuration));
        assert_eq!(limits.validate(-5.0), Err(ScheduleError::NonPositiveDuration));
        assert_eq!(limits.validate(f64::NAN), Err(ScheduleError::NonPositiveDuration));
        assert_eq!(
            limits.validate(1e-9),
            Err(ScheduleError::NonPositiveDuration)
        );
        assert_eq!(
            limits.validate(999_999.0),
            Err(ScheduleError::DurationOutOfRange { max_minutes: 10_080 })
        );
        assert_eq!(limits.validate(10_080.0), Ok(Duration::from_secs(10_080 * 60)));
        assert_eq!(limits.validate(0.5), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn unknown_action_maps_to_schedule_error() {
        let err: ScheduleError = "nap".parse::<PowerAction>().unwrap_err().into();
        assert_eq!(err, ScheduleError::UnknownAction("nap".into()));
    }

    #[tokio::test]
    async fn disarm_bumps_generation_and_aborts_tasks() {
        let mut slot = Slot::default();
        let handle = tokio::spawn(std::future::pending::<()>());
        slot.ticker = Some(handle);
        slot.armed = Some(Armed {
            pending: PendingAction::new(
                PowerAction::Shutdown,
                Duration::from_secs(60),
                now_utc(),
            ),
            last_remaining_ms: 60_000,
            mirrored: true,
        });
        let g = slot.generation;
        assert!(slot.current(g).is_some());
        assert!(slot.disarm(Caller::Outside).is_some());
        assert!(slot.current(g).is_none());
        assert!(slot.ticker.is_none());
        assert!(slot.disarm(Caller::Outside).is_none());
    }
}
