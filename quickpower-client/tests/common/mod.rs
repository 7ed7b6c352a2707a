#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quickpower_client::platform::{PowerControl, PowerError};
use quickpower_client::store::{JsonFileStore, SettingsStore, update_settings};
use quickpower_client::{Clock, ScheduleLimits, Scheduler, SchedulerEvent};
use quickpower_shared::domain::now_utc;
use quickpower_shared::settings::ScheduledMirror;
use quickpower_shared::{PendingAction, StatusSnapshot};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerCall {
    TimedShutdown(u64),
    TimedRestart(u64),
    Hibernate,
    Cancel,
}

#[derive(Default)]
pub struct RecordingPower {
    calls: Mutex<Vec<PowerCall>>,
    pub fail_register: AtomicBool,
    pub fail_hibernate: AtomicBool,
    pub fail_cancel: AtomicBool,
    pub register_delay_ms: AtomicU64,
}

impl RecordingPower {
    pub fn calls(&self) -> Vec<PowerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: PowerCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn register(&self, call: PowerCall) -> Result<(), PowerError> {
        self.record(call);
        let delay = self.register_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(failed("Access is denied."));
        }
        Ok(())
    }
}

fn failed(detail: &str) -> PowerError {
    PowerError::CommandFailed {
        program: "shutdown".into(),
        code: Some(5),
        detail: detail.into(),
    }
}

#[async_trait]
impl PowerControl for RecordingPower {
    async fn request_timed_shutdown(&self, seconds: u64) -> Result<(), PowerError> {
        self.register(PowerCall::TimedShutdown(seconds)).await
    }

    async fn request_timed_restart(&self, seconds: u64) -> Result<(), PowerError> {
        self.register(PowerCall::TimedRestart(seconds)).await
    }

    async fn request_immediate_hibernate(&self) -> Result<(), PowerError> {
        self.record(PowerCall::Hibernate);
        if self.fail_hibernate.load(Ordering::SeqCst) {
            return Err(failed("The request is not supported."));
        }
        Ok(())
    }

    async fn cancel_pending_timed_action(&self) -> Result<(), PowerError> {
        self.record(PowerCall::Cancel);
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(failed("cancel refused"));
        }
        Ok(())
    }
}

/// Wall clock that follows tokio's paused time, plus a manual offset that
/// stands in for a suspend/resume or an NTP correction.
pub struct VirtualClock {
    base: OffsetDateTime,
    start: Instant,
    offset: Mutex<time::Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            base: now_utc(),
            start: Instant::now(),
            offset: Mutex::new(time::Duration::ZERO),
        }
    }

    /// Move the wall clock without moving tokio's clock.
    pub fn jump(&self, by: time::Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> OffsetDateTime {
        self.base + self.start.elapsed() + *self.offset.lock().unwrap()
    }
}

pub struct Harness {
    pub power: Arc<RecordingPower>,
    pub store: Arc<JsonFileStore>,
    pub clock: Arc<VirtualClock>,
    _tempdir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            power: Arc::new(RecordingPower::default()),
            store: Arc::new(JsonFileStore::new(dir.path().join("settings.json"))),
            clock: Arc::new(VirtualClock::new()),
            _tempdir: dir,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::with_clock(
            self.power.clone(),
            self.store.clone(),
            ScheduleLimits::default(),
            self.clock.clone(),
        )
    }

    pub async fn recover(&self) -> Scheduler {
        self.scheduler().restore_persisted().await
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn mirror(&self) -> ScheduledMirror {
        self.store.load().unwrap().scheduled()
    }

    /// Write a record as another process would.
    pub fn write_record(&self, pending: Option<&PendingAction>) {
        update_settings(self.store.as_ref(), |s| s.set_scheduled(pending)).unwrap();
    }
}

pub fn mirror_of(p: &PendingAction) -> ScheduledMirror {
    ScheduledMirror::Present {
        target_time: p.target_time,
        action: p.action,
    }
}

pub async fn next_status(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Option<StatusSnapshot> {
    loop {
        if let SchedulerEvent::StatusChanged(s) = rx.recv().await.unwrap() {
            return s;
        }
    }
}
