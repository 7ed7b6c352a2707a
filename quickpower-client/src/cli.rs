use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use quickpower_shared::domain::{DurationUnit, Theme};

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $QUICKPOWER_CONFIG
  3) platform default: ~/.config/quickpower/config.yaml
"#;

#[derive(Debug, Parser)]
#[command(
    name = "quickpower",
    version,
    about = "Schedule a shutdown, restart or hibernate with a live countdown",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Also write logs to a daily rolling file in the data directory
    #[arg(long, global = true)]
    pub log_to_file: bool,
    /// Print machine-readable JSON responses
    #[arg(long, global = true)]
    pub json: bool,
    /// Optional subcommand. Without one, runs the agent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnitArg {
    Minutes,
    Hours,
}

impl From<UnitArg> for DurationUnit {
    fn from(u: UnitArg) -> Self {
        match u {
            UnitArg::Minutes => DurationUnit::Minutes,
            UnitArg::Hours => DurationUnit::Hours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ThemeArg {
    Light,
    Dark,
}

impl From<ThemeArg> for Theme {
    fn from(t: ThemeArg) -> Self {
        match t {
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Schedule an action and follow its countdown
    Schedule {
        /// Delay before the action
        #[arg(allow_negative_numbers = true)]
        value: f64,
        #[arg(short, long, value_enum, default_value_t = UnitArg::Minutes)]
        unit: UnitArg,
        /// shutdown, restart or hibernate
        #[arg(short, long, default_value = "shutdown")]
        action: String,
        /// Return right after scheduling (not available for hibernate)
        #[arg(short, long)]
        detach: bool,
    },
    /// Cancel the pending action
    Cancel,
    /// Show the pending action and the time left
    Status,
    /// Follow a pending action until it happens (default)
    Run,
    /// Store the preferred theme
    Theme {
        #[arg(value_enum)]
        theme: ThemeArg,
    },
    /// Start the agent at login so a pending action survives a reboot of this app
    Install,
    /// Remove the login autostart entry
    Uninstall,
    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_defaults_to_shutdown_in_minutes() {
        let cli = Cli::try_parse_from(["quickpower", "schedule", "30"]).unwrap();
        match cli.command {
            Some(Command::Schedule {
                value,
                unit,
                action,
                detach,
            }) => {
                assert_eq!(value, 30.0);
                assert_eq!(unit, UnitArg::Minutes);
                assert_eq!(action, "shutdown");
                assert!(!detach);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "quickpower", "schedule", "2", "--unit", "hours", "-a", "restart", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Some(Command::Schedule { unit: UnitArg::Hours, .. })
        ));
    }

    #[test]
    fn no_subcommand_runs_the_agent() {
        let cli = Cli::try_parse_from(["quickpower", "--log-to-file"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.log_to_file);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
