use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

pub mod app;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod notify;
pub mod platform;
pub mod scheduler;
pub mod store;

pub use cli::{Cli, Command};
pub use config::{ClientConfig, load_config, resolve_config_path};
pub use scheduler::{Clock, ScheduleLimits, Scheduler, SchedulerEvent, SystemClock};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Schedule(#[from] scheduler::ScheduleError),
    #[error(transparent)]
    Cancel(#[from] scheduler::CancelError),
    #[error("{0}")]
    Usage(String),
}

/// Logs go to stderr; with `to_file` they also go to a daily rolling file.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(to_file: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let stderr_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match to_file.then(config::default_log_dir).flatten() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quickpower.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .compact()
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(env_filter))
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let _log_guard = init_tracing(cli.log_to_file);
    platform::initialize_process();

    let command = cli.command.unwrap_or(Command::Run);
    match command {
        Command::Install => return platform::install().await,
        Command::Uninstall => return platform::uninstall().await,
        Command::Config {
            command: cli::ConfigCommand::Init { force },
        } => {
            let path = resolve_config_path(cli.config)?;
            return app::commands::config_init(&path, force);
        }
        _ => {}
    }

    let (cfg_path, cfg) = ClientConfig::find_and_load(cli.config)?;
    info!(path=?cfg_path, "loaded config");

    if let Command::Theme { theme } = command {
        return app::commands::theme(&cfg, theme.into());
    }

    let app = app::App::start(cfg).await?;
    match command {
        Command::Schedule {
            value,
            unit,
            action,
            detach,
        } => {
            let args = app::commands::ScheduleArgs {
                value,
                unit: unit.into(),
                action: &action,
                detach,
                json: cli.json,
            };
            app::commands::schedule(&app, args).await
        }
        Command::Cancel => app::commands::cancel(&app, cli.json).await,
        Command::Status => app::commands::status(&app, cli.json).await,
        _ => app::commands::run_agent(&app).await,
    }
}
