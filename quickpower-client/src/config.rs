use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::AppError;

pub const ENV_CONFIG: &str = "QUICKPOWER_CONFIG";
/// Windows `shutdown /a` exit code for "no shutdown in progress".
pub const WINDOWS_NO_SHUTDOWN_IN_PROGRESS: i32 = 1116;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// login1 when reachable, `shutdown.exe` on Windows, command templates otherwise.
    #[default]
    Auto,
    Login1,
    ShutdownExe,
    Command,
}

/// Per-action argv templates. `{seconds}` and `{minutes}` are substituted
/// with the requested delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplates {
    pub shutdown: Vec<String>,
    pub restart: Vec<String>,
    pub hibernate: Vec<String>,
    pub cancel: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl CommandTemplates {
    pub fn shutdown_exe() -> Self {
        Self {
            shutdown: argv(&["shutdown", "/s", "/t", "{seconds}"]),
            restart: argv(&["shutdown", "/r", "/t", "{seconds}"]),
            hibernate: argv(&["shutdown", "/h"]),
            cancel: argv(&["shutdown", "/a"]),
        }
    }

    /// sysvinit-style `shutdown(8)`; only minute granularity is available.
    pub fn unix_shutdown() -> Self {
        Self {
            shutdown: argv(&["shutdown", "-P", "+{minutes}"]),
            restart: argv(&["shutdown", "-r", "+{minutes}"]),
            hibernate: argv(&["systemctl", "hibernate"]),
            cancel: argv(&["shutdown", "-c"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Location of settings.json. Defaults to the platform data directory.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: u32,
    /// Show the "imminent" notification this many seconds before the action.
    #[serde(default = "default_warn_before_secs")]
    pub warn_before_secs: u64,
    #[serde(default = "default_true")]
    pub notifications: bool,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub backend: BackendKind,
    /// Optional override for OS commands. Example shutdown entry: ["shutdown", "-P", "+{minutes}"]
    #[serde(default)]
    pub commands: Option<CommandTemplates>,
    /// Exit codes of the cancel command meaning "nothing was scheduled".
    #[serde(default = "default_benign_cancel_exit_codes")]
    pub benign_cancel_exit_codes: Vec<i32>,
}

fn default_max_duration_minutes() -> u32 {
    60 * 24 * 7
}

fn default_warn_before_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_command_timeout_secs() -> u64 {
    15
}

fn default_benign_cancel_exit_codes() -> Vec<i32> {
    if cfg!(target_os = "windows") {
        vec![WINDOWS_NO_SHUTDOWN_IN_PROGRESS]
    } else {
        Vec::new()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            settings_path: None,
            max_duration_minutes: default_max_duration_minutes(),
            warn_before_secs: default_warn_before_secs(),
            notifications: true,
            command_timeout_secs: default_command_timeout_secs(),
            backend: BackendKind::default(),
            commands: None,
            benign_cancel_exit_codes: default_benign_cancel_exit_codes(),
        }
    }
}

impl ClientConfig {
    /// Resolve the config path and load it. A missing file means defaults.
    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, Self), AppError> {
        let path = resolve_config_path(cli_value)?;
        if !path.exists() {
            return Ok((path, Self::default()));
        }
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }

    pub fn settings_path(&self) -> Result<PathBuf, AppError> {
        if let Some(p) = &self.settings_path {
            return Ok(p.clone());
        }
        project_dirs()
            .map(|pd| pd.data_dir().join("settings.json"))
            .ok_or_else(|| AppError::Config("could not determine data dir".into()))
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "quickpower", "quickpower")
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(project_dirs()?.config_dir().join("config.yaml"))
}

pub fn default_log_dir() -> Option<PathBuf> {
    Some(project_dirs()?.data_local_dir().join("logs"))
}

pub fn load_config(path: &Path) -> Result<ClientConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    parse_config(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))
}

fn parse_config(data: &str) -> Result<ClientConfig, serde_yaml::Error> {
    // An empty document deserializes as unit, not as an empty mapping.
    if data.trim().is_empty() {
        return Ok(ClientConfig::default());
    }
    serde_yaml::from_str(data)
}

pub fn save_config(path: &Path, cfg: &ClientConfig) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| AppError::Config(format!("serialize config failed: {e}")))?;
    std::fs::write(path, data)
        .map_err(|e| AppError::Config(format!("write {} failed: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let cfg = parse_config("warn_before_secs: 120\nbackend: command\n").unwrap();
        assert_eq!(cfg.warn_before_secs, 120);
        assert_eq!(cfg.backend, BackendKind::Command);
        assert_eq!(cfg.max_duration_minutes, 10_080);
        assert!(cfg.notifications);
        assert!(cfg.commands.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_config("  \n").unwrap();
        assert_eq!(cfg.command_timeout_secs, 15);
        assert_eq!(cfg.backend, BackendKind::Auto);
    }

    #[test]
    fn command_templates_parse() {
        let cfg = parse_config(
            r#"
commands:
  shutdown: ["shutdown", "-P", "+{minutes}"]
  restart: ["shutdown", "-r", "+{minutes}"]
  hibernate: ["systemctl", "hibernate"]
  cancel: ["shutdown", "-c"]
benign_cancel_exit_codes: [1]
"#,
        )
        .unwrap();
        assert_eq!(cfg.commands, Some(CommandTemplates::unix_shutdown()));
        assert_eq!(cfg.benign_cancel_exit_codes, vec![1]);
    }

    #[test]
    fn missing_file_loads_defaults_and_bad_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let (p, cfg) = ClientConfig::find_and_load(Some(path.clone())).unwrap();
        assert_eq!(p, path);
        assert_eq!(cfg.warn_before_secs, 60);

        std::fs::write(&path, "max_duration_minutes: [oops").unwrap();
        assert!(matches!(
            ClientConfig::find_and_load(Some(path)),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let cfg = ClientConfig {
            warn_before_secs: 30,
            ..ClientConfig::default()
        };
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.warn_before_secs, 30);
    }
}
