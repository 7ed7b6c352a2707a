pub mod install;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info};
use zbus::proxy::Proxy;
use zbus_names::OwnedBusName;

use super::{PowerControl, PowerError};

const LOGIN1_NAME: &str = "org.freedesktop.login1";
const LOGIN1_PATH: &str = "/org/freedesktop/login1";
const LOGIN1_MANAGER: &str = "org.freedesktop.login1.Manager";

/// systemd-logind backend. `ScheduleShutdown` takes an absolute realtime
/// deadline, so the OS timer survives this process like `shutdown /t` does.
pub struct Login1Backend {
    timeout: Duration,
}

impl Login1Backend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn schedule(&self, kind: &str, seconds: u64) -> Result<(), PowerError> {
        let deadline = SystemTime::now() + Duration::from_secs(seconds);
        let usec = deadline
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PowerError::Dbus(format!("clock before epoch: {e}")))?
            .as_micros() as u64;
        info!(kind, seconds, usec, "login1: ScheduleShutdown");
        self.with_timeout("ScheduleShutdown", async {
            let conn = system_bus().await?;
            let proxy = manager_proxy(&conn).await?;
            proxy
                .call_method("ScheduleShutdown", &(kind, usec))
                .await
                .map_err(|e| PowerError::Dbus(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn with_timeout<F>(&self, method: &str, fut: F) -> Result<(), PowerError>
    where
        F: std::future::Future<Output = Result<(), PowerError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PowerError::Timeout {
                program: format!("login1.{method}"),
                secs: self.timeout.as_secs(),
            })?
    }
}

async fn system_bus() -> Result<zbus::Connection, PowerError> {
    zbus::Connection::system()
        .await
        .map_err(|e| PowerError::Dbus(e.to_string()))
}

async fn manager_proxy(conn: &zbus::Connection) -> Result<Proxy<'static>, PowerError> {
    Proxy::new(conn, LOGIN1_NAME, LOGIN1_PATH, LOGIN1_MANAGER)
        .await
        .map_err(|e| PowerError::Dbus(e.to_string()))
}

#[async_trait]
impl PowerControl for Login1Backend {
    async fn request_timed_shutdown(&self, seconds: u64) -> Result<(), PowerError> {
        self.schedule("poweroff", seconds).await
    }

    async fn request_timed_restart(&self, seconds: u64) -> Result<(), PowerError> {
        self.schedule("reboot", seconds).await
    }

    async fn request_immediate_hibernate(&self) -> Result<(), PowerError> {
        info!("login1: Hibernate");
        self.with_timeout("Hibernate", async {
            let conn = system_bus().await?;
            let proxy = manager_proxy(&conn).await?;
            proxy
                .call_method("Hibernate", &(false,))
                .await
                .map_err(|e| PowerError::Dbus(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn cancel_pending_timed_action(&self) -> Result<(), PowerError> {
        self.with_timeout("CancelScheduledShutdown", async {
            let conn = system_bus().await?;
            let proxy = manager_proxy(&conn).await?;
            let cancelled: bool = proxy
                .call("CancelScheduledShutdown", &())
                .await
                .map_err(|e| PowerError::Dbus(e.to_string()))?;
            // false only means nothing was scheduled.
            debug!(cancelled, "login1: CancelScheduledShutdown");
            Ok(())
        })
        .await
    }
}

/// Whether logind owns its well-known name on the system bus.
pub async fn login1_available() -> bool {
    let Ok(name) = OwnedBusName::try_from(LOGIN1_NAME) else {
        return false;
    };
    if let Ok(conn) = zbus::Connection::system().await
        && let Ok(proxy) = zbus::fdo::DBusProxy::new(&conn).await
        && proxy.name_has_owner(name.into()).await.unwrap_or(false)
    {
        info!("detected {LOGIN1_NAME} on system bus");
        return true;
    }
    false
}

/// Desktop notifications need the session bus; when started from a console or
/// a bare systemd unit the address is not always exported.
pub fn ensure_console_dbus_env() {
    if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_some() {
        return;
    }

    let Some(runtime_dir) = find_runtime_dir_with_bus() else {
        return;
    };

    export_runtime_dir(&runtime_dir);
    if let Some(addr) = build_bus_address(&runtime_dir) {
        // SAFETY: called once at start-up before any worker threads read the environment.
        unsafe {
            std::env::set_var("DBUS_SESSION_BUS_ADDRESS", addr);
        }
    }
}

fn find_runtime_dir_with_bus() -> Option<PathBuf> {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .and_then(runtime_dir_if_bus_exists)
        .or_else(|| runtime_dir_if_bus_exists(default_runtime_dir()))
}

fn runtime_dir_if_bus_exists(dir: PathBuf) -> Option<PathBuf> {
    dir.join("bus").exists().then_some(dir)
}

fn default_runtime_dir() -> PathBuf {
    let uid = nix::unistd::geteuid().as_raw();
    PathBuf::from(format!("/run/user/{uid}"))
}

fn export_runtime_dir(runtime: &Path) {
    if std::env::var_os("XDG_RUNTIME_DIR").is_none() {
        // SAFETY: see ensure_console_dbus_env.
        unsafe {
            std::env::set_var("XDG_RUNTIME_DIR", runtime.as_os_str());
        }
    }
}

fn build_bus_address(runtime: &Path) -> Option<String> {
    let bus = runtime.join("bus");
    bus.exists().then(|| format!("unix:path={}", bus.display()))
}
