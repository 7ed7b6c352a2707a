use std::path::Path;

use quickpower_shared::api::{ScheduleReq, ScheduleResp};
use quickpower_shared::domain::{DurationUnit, Theme};
use quickpower_shared::{PendingAction, PowerAction};
use serde::Serialize;
use time::UtcOffset;
use time::macros::format_description;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::App;
use super::agent::{self, FollowEnd, Presenter, format_hms};
use crate::AppError;
use crate::config::{ClientConfig, save_config};
use crate::handlers;
use crate::notify::Note;
use crate::scheduler::CancelOutcome;
use crate::store::{JsonFileStore, update_settings};

pub struct ScheduleArgs<'a> {
    pub value: f64,
    pub unit: DurationUnit,
    pub action: &'a str,
    pub detach: bool,
    pub json: bool,
}

pub async fn schedule(app: &App, args: ScheduleArgs<'_>) -> Result<(), AppError> {
    if args.detach && args.action.parse::<PowerAction>() == Ok(PowerAction::Hibernate) {
        return Err(AppError::Usage(
            "--detach cannot be used with hibernate: the trigger runs in this process".into(),
        ));
    }
    let req = ScheduleReq {
        minutes: args.unit.to_minutes(args.value),
        action: args.action.to_string(),
        original_value: Some(args.value),
        original_unit: Some(args.unit),
    };
    let pending = match handlers::try_schedule(&app.scheduler, app.store.as_ref(), &req).await {
        Ok(p) => p,
        Err(e) => {
            let message = handlers::schedule_error_message(&e);
            if args.json {
                print_json(&ScheduleResp::err(message));
            } else {
                eprintln!("{message}");
            }
            return Err(AppError::Schedule(e));
        }
    };

    if args.json {
        print_json(&ScheduleResp::ok());
    } else {
        println!(
            "{} scheduled for {} (in {}).",
            pending.action.label(),
            local_time(&pending),
            format_hms(pending.initial_duration_ms)
        );
    }
    let mut presenter = app.presenter();
    presenter.notify(Note::scheduled(&pending)).await;

    if args.detach {
        app.scheduler.shutdown().await;
        return Ok(());
    }
    follow_until_signal(app, &mut presenter).await;
    Ok(())
}

pub async fn cancel(app: &App, json: bool) -> Result<(), AppError> {
    let outcome = app.scheduler.cancel().await;
    let resp = handlers::cancel_response(&outcome);
    if json {
        print_json(&resp);
    } else if let Some(m) = resp.message.as_ref().or(resp.error.as_ref()) {
        println!("{m}");
    }
    if let Ok(CancelOutcome::Cancelled(_)) = outcome {
        app.presenter().notify(Note::cancelled()).await;
    }
    app.scheduler.shutdown().await;
    outcome.map(|_| ()).map_err(AppError::Cancel)
}

pub async fn status(app: &App, json: bool) -> Result<(), AppError> {
    let resp = handlers::status(&app.scheduler).await;
    if json {
        print_json(&resp);
    } else {
        match (app.scheduler.state().await, resp.remaining_ms) {
            (Some(p), Some(ms)) => println!(
                "{} at {} (in {}).",
                p.action.label(),
                local_time(&p),
                format_hms(ms)
            ),
            _ => println!("Nothing scheduled."),
        }
    }
    app.scheduler.shutdown().await;
    Ok(())
}

/// Background agent: follow a recovered schedule until it is done.
pub async fn run_agent(app: &App) -> Result<(), AppError> {
    if app.scheduler.state().await.is_none() {
        info!("nothing pending; exiting");
        return Ok(());
    }
    let mut presenter = app.presenter();
    follow_until_signal(app, &mut presenter).await;
    Ok(())
}

async fn follow_until_signal(app: &App, presenter: &mut Presenter) {
    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            agent::shutdown_signal().await;
            cancel.cancel();
        }
    });

    let end = agent::follow(&app.scheduler, presenter, cancel.child_token()).await;
    signal_task.abort();

    if end == FollowEnd::Interrupted
        && let Some(p) = app.scheduler.state().await
    {
        info!(action=%p.action, "stopped following; schedule left in place");
        if p.action.is_self_timed() {
            eprintln!("{} stays scheduled with the operating system.", p.action.label());
        } else {
            eprintln!(
                "{} will not happen until `quickpower run` is started again.",
                p.action.label()
            );
        }
    }
    app.scheduler.shutdown().await;
}

/// Store the theme key; no power backend involved.
pub fn theme(cfg: &ClientConfig, theme: Theme) -> Result<(), AppError> {
    let store = JsonFileStore::new(cfg.settings_path()?);
    update_settings(&store, |s| s.theme = theme)?;
    println!("Theme set to {}.", theme_name(theme));
    Ok(())
}

fn theme_name(theme: Theme) -> &'static str {
    match theme {
        Theme::Light => "light",
        Theme::Dark => "dark",
    }
}

pub fn config_init(path: &Path, force: bool) -> Result<(), AppError> {
    if path.exists() && !force {
        warn!(path=%path.display(), "config already exists; use --force to overwrite");
        println!("{} already exists.", path.display());
        return Ok(());
    }
    save_config(path, &ClientConfig::default())?;
    println!("Wrote {}.", path.display());
    Ok(())
}

fn local_time(pending: &PendingAction) -> String {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    pending
        .target_time
        .to_offset(offset)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| pending.snapshot().time)
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => warn!(error=%e, "failed to serialize response"),
    }
}
