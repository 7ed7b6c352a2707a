use tokio::process::Command;
use tracing::{info, warn};

use crate::AppError;

pub const TASK_NAME: &str = "QuickPower";

/// Register a logon task that runs the agent so a pending action is resumed.
pub async fn install_for_current_user() -> Result<(), AppError> {
    let exe = std::env::current_exe().map_err(AppError::Io)?;
    let exe_str = exe.display().to_string();
    let args_vec = build_schtasks_create_args(TASK_NAME, &task_command(&exe_str));

    let status = Command::new("schtasks")
        .args(args_vec.iter().map(|s| s.as_str()))
        .status()
        .await
        .map_err(AppError::Io)?;
    if !status.success() {
        // ONLOGON triggers may need elevation on locked-down machines.
        let ps_cmd = build_powershell_elevated_schtasks(&args_vec);
        let ps_status = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &ps_cmd])
            .status()
            .await
            .map_err(AppError::Io)?;
        if !ps_status.success() {
            return Err(AppError::Io(std::io::Error::other(format!(
                "schtasks elevated /Create failed with status {ps_status}"
            ))));
        }
    }

    info!(task=TASK_NAME, path=%exe_str, "scheduled task installed for current user");
    println!("Installed logon task \"{TASK_NAME}\".");
    Ok(())
}

pub async fn uninstall_for_current_user() -> Result<(), AppError> {
    let status = Command::new("schtasks")
        .args(["/Delete", "/F", "/TN", TASK_NAME])
        .status()
        .await
        .map_err(AppError::Io)?;
    if !status.success() {
        warn!(
            task = TASK_NAME,
            status = %status,
            "schtasks /Delete failed or task missing; continuing"
        );
    }
    println!("Removed logon task \"{TASK_NAME}\".");
    Ok(())
}

fn task_command(exe: &str) -> String {
    format!("\"{exe}\" run --log-to-file")
}

fn build_powershell_elevated_schtasks(args: &[String]) -> String {
    let ps_args = args
        .iter()
        .map(|a| format!("'{}'", a.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "$p = Start-Process -FilePath 'schtasks' -ArgumentList @({ps_args}) -Verb RunAs -Wait -PassThru; exit $p.ExitCode"
    )
}

fn build_schtasks_create_args(task_name: &str, task_run: &str) -> Vec<String> {
    [
        "/Create", "/F", "/SC", "ONLOGON", "/RL", "LIMITED", "/IT", "/TN", task_name, "/TR",
        task_run,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
