//! Caller-facing operations: validate a request, drive the scheduler and turn
//! the outcome into a response DTO with a user-facing message.

use quickpower_shared::{PendingAction, PowerAction};
use quickpower_shared::api::{CancelResp, ScheduleReq, ScheduleResp, StatusResp};
use quickpower_shared::domain::duration_ms;
use tracing::warn;

use crate::scheduler::{CancelError, CancelOutcome, ScheduleError, Scheduler};
use crate::store::{SettingsStore, update_settings};

pub fn schedule_error_message(err: &ScheduleError) -> String {
    match err {
        ScheduleError::NonPositiveDuration => "Invalid duration.".to_string(),
        ScheduleError::DurationOutOfRange { max_minutes } => {
            format!("Duration too long (maximum {max_minutes} minutes).")
        }
        ScheduleError::UnknownAction(_) => "Unknown action.".to_string(),
        ScheduleError::OsRejected(detail) => {
            format!("Unable to schedule the action. Check your permissions. ({detail})")
        }
        ScheduleError::Busy => "Another request is in progress. Try again.".to_string(),
    }
}

pub async fn try_schedule(
    scheduler: &Scheduler,
    store: &dyn SettingsStore,
    req: &ScheduleReq,
) -> Result<PendingAction, ScheduleError> {
    let action: PowerAction = req.action.parse()?;
    let pending = scheduler.schedule(req.minutes, action).await?;
    remember_duration(store, req);
    Ok(pending)
}

pub async fn schedule(
    scheduler: &Scheduler,
    store: &dyn SettingsStore,
    req: &ScheduleReq,
) -> ScheduleResp {
    match try_schedule(scheduler, store, req).await {
        Ok(_) => ScheduleResp::ok(),
        Err(e) => ScheduleResp::err(schedule_error_message(&e)),
    }
}

/// Remember the value the user typed so the next prompt can offer it again.
fn remember_duration(store: &dyn SettingsStore, req: &ScheduleReq) {
    let value = req.original_value.unwrap_or(req.minutes);
    let unit = req.original_unit.unwrap_or_default();
    if let Err(e) = update_settings(store, |s| {
        s.last_duration_value = value;
        s.last_duration_unit = unit;
    }) {
        warn!(error=%e, "failed to remember last duration");
    }
}

pub fn cancel_response(outcome: &Result<CancelOutcome, CancelError>) -> CancelResp {
    match outcome {
        Ok(CancelOutcome::Cancelled(_)) => CancelResp::ok("Action cancelled."),
        Ok(CancelOutcome::NothingPending) => CancelResp::ok("Nothing to cancel."),
        Err(CancelError::Busy) => CancelResp::err("Another request is in progress. Try again."),
    }
}

pub async fn cancel(scheduler: &Scheduler) -> CancelResp {
    cancel_response(&scheduler.cancel().await)
}

pub async fn status(scheduler: &Scheduler) -> StatusResp {
    let pending = scheduler.state().await;
    let remaining = scheduler.remaining().await;
    StatusResp {
        pending: pending.map(|p| p.snapshot()),
        remaining_ms: remaining.map(duration_ms),
    }
}
