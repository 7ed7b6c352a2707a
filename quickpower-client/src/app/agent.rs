use std::io::{IsTerminal, Write};
use std::time::Duration;

use quickpower_shared::{PowerAction, StatusSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::{NotificationBackend, Note};
use crate::scheduler::{Scheduler, SchedulerEvent};

/// How often the agent re-reads the persisted schedule for changes made by
/// other invocations.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(5);
const BAR_WIDTH: usize = 20;

/// `HH:MM:SS`, hours uncapped.
pub fn format_hms(ms: u64) -> String {
    let total = ms / 1000;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Fires once each time the countdown enters the warning window.
#[derive(Debug, Clone)]
pub struct ImminentWarning {
    threshold_ms: u64,
    fired: bool,
}

impl ImminentWarning {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold_ms: quickpower_shared::domain::duration_ms(threshold),
            fired: false,
        }
    }

    pub fn reset(&mut self) {
        self.fired = false;
    }

    pub fn observe(&mut self, remaining_ms: u64) -> bool {
        if remaining_ms > self.threshold_ms {
            self.fired = false;
            return false;
        }
        remaining_ms > 0 && !std::mem::replace(&mut self.fired, true)
    }
}

/// How a `follow` loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowEnd {
    /// Nothing is pending any more.
    Idle,
    /// Stopped by a signal; the schedule is left in place.
    Interrupted,
}

/// Turns scheduler events into terminal output, log lines and notifications.
pub struct Presenter {
    notifier: Box<dyn NotificationBackend>,
    warning: ImminentWarning,
    current: Option<PowerAction>,
    last_remaining_ms: Option<u64>,
    last_logged_minute: Option<u64>,
    interactive: bool,
    line_open: bool,
}

impl Presenter {
    pub fn new(notifier: Box<dyn NotificationBackend>, warn_before: Duration) -> Self {
        Self {
            notifier,
            warning: ImminentWarning::new(warn_before),
            current: None,
            last_remaining_ms: None,
            last_logged_minute: None,
            interactive: std::io::stderr().is_terminal(),
            line_open: false,
        }
    }

    pub async fn notify(&mut self, note: Note) {
        self.notifier.show(&note).await;
    }

    /// Start presenting an action that was already pending before `follow`.
    pub fn adopt(&mut self, snapshot: &StatusSnapshot) {
        self.reset(Some(snapshot.action));
        info!(action=%snapshot.action, at=%snapshot.time, "following pending action");
    }

    fn reset(&mut self, action: Option<PowerAction>) {
        self.current = action;
        self.last_remaining_ms = None;
        self.last_logged_minute = None;
        self.warning.reset();
    }

    async fn on_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Tick {
                remaining_ms,
                ratio,
            } => self.on_tick(remaining_ms, ratio).await,
            SchedulerEvent::StatusChanged(Some(snapshot)) => {
                self.close_line();
                let replaced = self.current.is_some();
                self.adopt(&snapshot);
                if replaced {
                    eprintln!("Now following {} at {}.", snapshot.action.label(), snapshot.time);
                }
            }
            SchedulerEvent::StatusChanged(None) => {
                self.close_line();
                let Some(action) = self.current.take() else {
                    return;
                };
                match self.last_remaining_ms {
                    Some(0) => {
                        info!(%action, "countdown finished");
                        eprintln!("{} is being carried out.", action.label());
                    }
                    _ => {
                        info!(%action, "no longer pending");
                        eprintln!("{} is no longer scheduled.", action.label());
                    }
                }
            }
            SchedulerEvent::DeferredFailed { action, detail } => {
                self.close_line();
                eprintln!("{} failed: {detail}", action.label());
                self.notify(Note::failed(action, &detail)).await;
            }
        }
    }

    async fn on_tick(&mut self, remaining_ms: u64, ratio: f64) {
        let Some(action) = self.current else {
            return;
        };
        self.last_remaining_ms = Some(remaining_ms);

        let minute = remaining_ms.div_ceil(60_000);
        if self.last_logged_minute != Some(minute) {
            self.last_logged_minute = Some(minute);
            info!(%action, remaining=%format_hms(remaining_ms), "countdown");
        }
        if self.interactive {
            let filled = (((1.0 - ratio) * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
            let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\r{} in {} [{bar}]", action.label(), format_hms(remaining_ms));
            let _ = err.flush();
            self.line_open = true;
        }
        if self.warning.observe(remaining_ms) {
            self.notify(Note::imminent(action, remaining_ms)).await;
        }
    }

    fn close_line(&mut self) {
        if std::mem::take(&mut self.line_open) {
            eprintln!();
        }
    }
}

/// Present the scheduler's countdown until nothing is pending or `cancel` fires.
pub async fn follow(
    scheduler: &Scheduler,
    presenter: &mut Presenter,
    cancel: CancellationToken,
) -> FollowEnd {
    let mut rx = scheduler.subscribe();
    match scheduler.state().await {
        Some(pending) => presenter.adopt(&pending.snapshot()),
        None => return FollowEnd::Idle,
    }

    let mut resync = tokio::time::interval(RESYNC_INTERVAL);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    resync.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                presenter.close_line();
                return FollowEnd::Interrupted;
            }
            _ = resync.tick() => {
                scheduler.resync().await;
            }
            ev = rx.recv() => match ev {
                Ok(event) => {
                    let idle = matches!(event, SchedulerEvent::StatusChanged(None));
                    presenter.on_event(event).await;
                    if idle {
                        // A deferred failure is sent right after the idle status.
                        while let Ok(late) = rx.try_recv() {
                            presenter.on_event(late).await;
                        }
                        return FollowEnd::Idle;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(missed=%n, "event subscriber lagged; resyncing");
                    if scheduler.state().await.is_none() {
                        presenter.on_event(SchedulerEvent::StatusChanged(None)).await;
                        return FollowEnd::Idle;
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("scheduler event channel closed");
                    return FollowEnd::Idle;
                }
            }
        }
    }
}

/// Resolves on SIGINT/SIGTERM (Ctrl+C on Windows).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error=%e, "cannot install signal handlers; falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown: received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(999), "00:00:00");
        assert_eq!(format_hms(61_000), "00:01:01");
        assert_eq!(format_hms(30 * 60_000), "00:30:00");
        assert_eq!(format_hms(10_080 * 60_000), "168:00:00");
    }

    #[test]
    fn imminent_warning_fires_once_per_window() {
        let mut w = ImminentWarning::new(Duration::from_secs(60));
        assert!(!w.observe(120_000));
        assert!(w.observe(60_000));
        assert!(!w.observe(59_000));
        assert!(!w.observe(0));
        // Rescheduled further out, then coming back into the window.
        assert!(!w.observe(300_000));
        assert!(w.observe(30_000));
        w.reset();
        assert!(w.observe(10_000));
    }
}
