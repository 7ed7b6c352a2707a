use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tinytemplate::TinyTemplate;
use tokio::process::Command;
use tracing::{debug, info};

use super::{PowerControl, PowerError};
use crate::config::CommandTemplates;

#[derive(Debug, Serialize)]
struct DelayCtx {
    seconds: u64,
    /// Rounded up so a minute-granular OS timer never fires early.
    minutes: u64,
}

impl DelayCtx {
    fn new(seconds: u64) -> Self {
        Self {
            seconds,
            minutes: seconds.div_ceil(60),
        }
    }
}

/// Power backend that shells out to OS commands (`shutdown.exe`, `shutdown(8)`,
/// or user-provided templates).
pub struct CommandBackend {
    templates: CommandTemplates,
    timeout: Duration,
    benign_cancel_exit_codes: Vec<i32>,
}

impl CommandBackend {
    pub fn new(
        templates: CommandTemplates,
        timeout: Duration,
        benign_cancel_exit_codes: Vec<i32>,
    ) -> Self {
        Self {
            templates,
            timeout,
            benign_cancel_exit_codes,
        }
    }

    async fn run(
        &self,
        template: &[String],
        seconds: u64,
        benign: &[i32],
    ) -> Result<(), PowerError> {
        let argv = render_argv(template, &DelayCtx::new(seconds))?;
        run_command(&argv, self.timeout, benign).await
    }
}

#[async_trait]
impl PowerControl for CommandBackend {
    async fn request_timed_shutdown(&self, seconds: u64) -> Result<(), PowerError> {
        self.run(&self.templates.shutdown, seconds, &[]).await
    }

    async fn request_timed_restart(&self, seconds: u64) -> Result<(), PowerError> {
        self.run(&self.templates.restart, seconds, &[]).await
    }

    async fn request_immediate_hibernate(&self) -> Result<(), PowerError> {
        self.run(&self.templates.hibernate, 0, &[]).await
    }

    async fn cancel_pending_timed_action(&self) -> Result<(), PowerError> {
        self.run(&self.templates.cancel, 0, &self.benign_cancel_exit_codes)
            .await
    }
}

fn render_argv(template: &[String], ctx: &DelayCtx) -> Result<Vec<String>, PowerError> {
    if template.is_empty() {
        return Err(PowerError::Template("command is empty".into()));
    }
    template
        .iter()
        .map(|arg| {
            if !arg.contains('{') {
                return Ok(arg.clone());
            }
            let mut tt = TinyTemplate::new();
            tt.set_default_formatter(&tinytemplate::format_unescaped);
            tt.add_template("arg", arg)
                .map_err(|e| PowerError::Template(format!("{arg}: {e}")))?;
            tt.render("arg", ctx)
                .map_err(|e| PowerError::Template(format!("{arg}: {e}")))
        })
        .collect()
}

/// Run `argv` to completion. Exit codes listed in `benign` count as success.
pub(crate) async fn run_command(
    argv: &[String],
    timeout: Duration,
    benign: &[i32],
) -> Result<(), PowerError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PowerError::Template("command is empty".into()))?;
    info!(program=%program, args=?args, "running power command");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| PowerError::Timeout {
            program: program.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|source| PowerError::Spawn {
            program: program.clone(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let code = output.status.code();
    if let Some(c) = code
        && benign.contains(&c)
    {
        debug!(program=%program, code=c, "exit code treated as benign");
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
    Err(PowerError::CommandFailed {
        program: program.clone(),
        code,
        detail: detail.trim().to_string(),
    })
}
