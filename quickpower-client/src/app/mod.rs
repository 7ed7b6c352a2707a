use std::sync::Arc;

use tracing::info;

use crate::AppError;
use crate::config::ClientConfig;
use crate::notify;
use crate::platform;
use crate::scheduler::{ScheduleLimits, Scheduler};
use crate::store::JsonFileStore;

pub mod agent;
pub mod commands;

/// Everything a command needs once the config is loaded.
pub struct App {
    pub cfg: ClientConfig,
    pub store: Arc<JsonFileStore>,
    pub scheduler: Scheduler,
}

impl App {
    /// Open the store, pick the power backend and recover any persisted schedule.
    pub async fn start(cfg: ClientConfig) -> Result<Self, AppError> {
        let store = Arc::new(JsonFileStore::new(cfg.settings_path()?));
        info!(path=%store.path().display(), "using settings file");
        let power = platform::detect(&cfg).await?;
        let limits = ScheduleLimits {
            max_duration_minutes: cfg.max_duration_minutes,
        };
        let scheduler = Scheduler::recover(power, store.clone(), limits).await;
        Ok(Self {
            cfg,
            store,
            scheduler,
        })
    }

    pub fn presenter(&self) -> agent::Presenter {
        agent::Presenter::new(
            notify::default_backend(self.cfg.notifications),
            std::time::Duration::from_secs(self.cfg.warn_before_secs),
        )
    }
}
