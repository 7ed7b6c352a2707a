use std::io::Write;
use std::path::{Path, PathBuf};

use quickpower_shared::Settings;
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("settings io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable key/value record surviving process restarts.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, StoreError>;
    fn save(&self, settings: &Settings) -> Result<(), StoreError>;
}

/// Read-modify-write. An unreadable record is replaced by defaults, matching
/// what a fresh install would write. Nothing is written when `f` changes nothing.
pub fn update_settings(
    store: &dyn SettingsStore,
    f: impl FnOnce(&mut Settings),
) -> Result<(), StoreError> {
    let (mut settings, before) = match store.load() {
        Ok(s) => {
            let before = s.clone();
            (s, Some(before))
        }
        Err(e) => {
            warn!(error=%e, "settings unreadable; starting from defaults");
            (Settings::default(), None)
        }
    };
    f(&mut settings);
    if before.as_ref() == Some(&settings) {
        return Ok(());
    }
    store.save(&settings)
}

/// `settings.json` on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Settings, StoreError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(self.io_err(e)),
        };
        Settings::from_json_str(&data).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        let data = settings.to_json_string()?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        // Temp file in the same directory so the final rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.io_err(e))?;
        tmp.write_all(data.as_bytes()).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickpower_shared::PowerAction;
    use quickpower_shared::domain::Theme;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("settings.json");
        let store = JsonFileStore::new(&path);

        let mut s = Settings::default();
        s.theme = Theme::Dark;
        s.scheduled_action = Some(PowerAction::Restart);
        s.scheduled_time = Some(quickpower_shared::domain::now_utc());
        store.save(&s).unwrap();
        s.set_scheduled(None);
        store.save(&s).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.theme, Theme::Dark);
        assert_eq!(loaded.scheduled_action, None);
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1, "temp files must not be left behind");
    }

    #[test]
    fn corrupt_file_is_a_parse_error_and_update_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Parse { .. })));

        update_settings(&store, |s| s.theme = Theme::Dark).unwrap();
        assert_eq!(store.load().unwrap().theme, Theme::Dark);
    }

    struct CountingStore {
        inner: JsonFileStore,
        saves: std::sync::atomic::AtomicUsize,
    }

    impl SettingsStore for CountingStore {
        fn load(&self) -> Result<Settings, StoreError> {
            self.inner.load()
        }
        fn save(&self, settings: &Settings) -> Result<(), StoreError> {
            self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.save(settings)
        }
    }

    #[test]
    fn unchanged_record_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = CountingStore {
            inner: JsonFileStore::new(dir.path().join("settings.json")),
            saves: Default::default(),
        };
        update_settings(&store, |s| s.set_scheduled(None)).unwrap();
        assert_eq!(store.saves.load(std::sync::atomic::Ordering::SeqCst), 0);
        update_settings(&store, |s| s.theme = Theme::Dark).unwrap();
        update_settings(&store, |s| s.theme = Theme::Dark).unwrap();
        assert_eq!(store.saves.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
