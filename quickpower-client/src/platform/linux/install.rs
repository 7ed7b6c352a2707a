use std::path::PathBuf;

use directories::BaseDirs;
use tinytemplate::TinyTemplate;
use tokio::process::Command;
use tracing::{info, warn};

use crate::AppError;

const USER_UNIT_NAME: &str = "quickpower.service";
const USER_UNIT_TEMPLATE: &str = include_str!("../../../systemd/quickpower.service");

/// Install and enable a systemd user unit that resumes any pending action at login.
pub async fn install_user_unit() -> Result<(), AppError> {
    let unit_dir = user_systemd_unit_dir()?;
    std::fs::create_dir_all(&unit_dir).map_err(AppError::Io)?;
    let unit_path = unit_dir.join(USER_UNIT_NAME);
    let bin_path = resolve_binary_path()?;
    let unit_text = render_user_unit(&bin_path)?;
    std::fs::write(&unit_path, unit_text).map_err(AppError::Io)?;
    info!(path=%unit_path.display(), "install: wrote user systemd unit");

    run_cmd("systemctl", &["--user", "daemon-reload"]).await?;
    run_cmd("systemctl", &["--user", "enable", "quickpower"]).await?;

    println!(
        "Installed {}. Pending actions will be resumed at the next login.",
        unit_path.display()
    );
    Ok(())
}

pub async fn uninstall_user_unit() -> Result<(), AppError> {
    // best-effort: the unit may never have been enabled
    let _ = run_cmd("systemctl", &["--user", "disable", "quickpower"]).await;

    let unit_path = user_systemd_unit_dir()?.join(USER_UNIT_NAME);
    if unit_path.exists() {
        std::fs::remove_file(&unit_path).map_err(AppError::Io)?;
        let _ = run_cmd("systemctl", &["--user", "daemon-reload"]).await;
    }
    println!("Uninstalled {}.", unit_path.display());
    Ok(())
}

fn user_systemd_unit_dir() -> Result<PathBuf, AppError> {
    let base =
        BaseDirs::new().ok_or_else(|| AppError::Config("cannot find home directory".into()))?;
    Ok(base.config_dir().join("systemd").join("user"))
}

fn resolve_binary_path() -> Result<String, AppError> {
    let exe = std::env::current_exe().map_err(AppError::Io)?;
    Ok(exe.display().to_string())
}

#[derive(serde::Serialize)]
struct UnitCtx<'a> {
    binary_path: &'a str,
}

fn render_user_unit(binary_path: &str) -> Result<String, AppError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("unit", USER_UNIT_TEMPLATE)
        .map_err(|e| AppError::Config(format!("template error: {e}")))?;
    let ctx = UnitCtx { binary_path };
    tt.render("unit", &ctx)
        .map_err(|e| AppError::Config(format!("render error: {e}")))
}

async fn run_cmd(prog: &str, args: &[&str]) -> Result<(), AppError> {
    let status = Command::new(prog).args(args).status().await.map_err(AppError::Io)?;
    if !status.success() {
        warn!(program=%prog, ?args, %status, "command failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_runs_the_agent_from_the_installed_binary() {
        let unit = render_user_unit("/opt/quick power/bin/quickpower").unwrap();
        assert!(unit.contains("ExecStart=/opt/quick power/bin/quickpower run\n"));
        assert!(unit.contains("WantedBy=default.target"));
    }
}
