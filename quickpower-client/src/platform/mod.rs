pub mod command;
#[cfg(not(target_os = "windows"))]
pub mod linux;
#[cfg(target_os = "windows")]
pub mod windows;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::AppError;
use crate::config::{BackendKind, ClientConfig, CommandTemplates};

#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("{program} exited with {}: {detail}", exit_label(.code))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        detail: String,
    },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("dbus error: {0}")]
    Dbus(String),
    #[error("command template error: {0}")]
    Template(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

/// OS power-action capability.
///
/// `cancel_pending_timed_action` succeeds both when something was cancelled
/// and when nothing was pending.
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn request_timed_shutdown(&self, seconds: u64) -> Result<(), PowerError>;
    async fn request_timed_restart(&self, seconds: u64) -> Result<(), PowerError>;
    async fn request_immediate_hibernate(&self) -> Result<(), PowerError>;
    async fn cancel_pending_timed_action(&self) -> Result<(), PowerError>;
}

/// Pick the power backend for this machine and config.
pub async fn detect(cfg: &ClientConfig) -> Result<Arc<dyn PowerControl>, AppError> {
    let timeout = cfg.command_timeout();
    let from_templates = |templates: CommandTemplates| -> Arc<dyn PowerControl> {
        Arc::new(command::CommandBackend::new(
            templates,
            timeout,
            cfg.benign_cancel_exit_codes.clone(),
        ))
    };

    match cfg.backend {
        BackendKind::Command => {
            let templates = cfg.commands.clone().ok_or_else(|| {
                AppError::Config("backend 'command' requires a commands section".into())
            })?;
            info!("power backend: command templates (config)");
            Ok(from_templates(templates))
        }
        BackendKind::ShutdownExe => {
            info!("power backend: shutdown.exe");
            Ok(from_templates(CommandTemplates::shutdown_exe()))
        }
        BackendKind::Login1 => login1(cfg).await,
        BackendKind::Auto => {
            if let Some(templates) = cfg.commands.clone() {
                info!("power backend: command templates (config override)");
                return Ok(from_templates(templates));
            }
            #[cfg(target_os = "windows")]
            {
                info!("power backend: shutdown.exe");
                Ok(from_templates(CommandTemplates::shutdown_exe()))
            }
            #[cfg(not(target_os = "windows"))]
            {
                if linux::login1_available().await {
                    return login1(cfg).await;
                }
                info!("login1 not reachable; power backend: shutdown(8)");
                Ok(from_templates(CommandTemplates::unix_shutdown()))
            }
        }
    }
}

#[cfg(not(target_os = "windows"))]
async fn login1(cfg: &ClientConfig) -> Result<Arc<dyn PowerControl>, AppError> {
    info!("power backend: org.freedesktop.login1");
    Ok(Arc::new(linux::Login1Backend::new(cfg.command_timeout())))
}

#[cfg(target_os = "windows")]
async fn login1(_cfg: &ClientConfig) -> Result<Arc<dyn PowerControl>, AppError> {
    Err(AppError::Config(
        "backend 'login1' is not available on Windows".into(),
    ))
}

/// Register the agent to start at login.
pub async fn install() -> Result<(), AppError> {
    #[cfg(target_os = "windows")]
    {
        windows::install::install_for_current_user().await
    }
    #[cfg(not(target_os = "windows"))]
    {
        linux::install::install_user_unit().await
    }
}

pub async fn uninstall() -> Result<(), AppError> {
    #[cfg(target_os = "windows")]
    {
        windows::install::uninstall_for_current_user().await
    }
    #[cfg(not(target_os = "windows"))]
    {
        linux::install::uninstall_user_unit().await
    }
}

/// Process-wide environment fixes before talking to desktop services.
pub fn initialize_process() {
    #[cfg(not(target_os = "windows"))]
    linux::ensure_console_dbus_env();
}
