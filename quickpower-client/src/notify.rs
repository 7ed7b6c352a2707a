use async_trait::async_trait;
use quickpower_shared::{PendingAction, PowerAction};
use time::UtcOffset;
use time::macros::format_description;
use tracing::{debug, info, warn};

const APP_NAME: &str = "QuickPower";

/// A single desktop notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub summary: String,
    pub body: String,
    pub urgent: bool,
}

impl Note {
    pub fn scheduled(pending: &PendingAction) -> Self {
        let local = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        let at = pending
            .target_time
            .to_offset(local)
            .format(format_description!("[hour]:[minute]"))
            .unwrap_or_else(|_| pending.snapshot().time);
        Self {
            summary: APP_NAME.to_string(),
            body: format!("{} scheduled for {at}.", pending.action.label()),
            urgent: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            summary: APP_NAME.to_string(),
            body: "Action cancelled.".to_string(),
            urgent: false,
        }
    }

    pub fn imminent(action: PowerAction, remaining_ms: u64) -> Self {
        let secs = remaining_ms.div_ceil(1000);
        Self {
            summary: format!("{APP_NAME}: action imminent"),
            body: format!("{} in {secs} s!", action.label()),
            urgent: true,
        }
    }

    pub fn failed(action: PowerAction, detail: &str) -> Self {
        Self {
            summary: format!("{APP_NAME}: {} failed", action.label()),
            body: detail.to_string(),
            urgent: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    Desktop,
    LogOnly,
}

#[async_trait]
pub trait NotificationBackend: Send {
    async fn show(&mut self, note: &Note);
}

/// Desktop notifier that falls back to the log once the desktop refuses.
#[derive(Debug)]
pub struct Notifier {
    kind: NotifierKind,
    #[cfg(not(target_os = "windows"))]
    replace_id: u32,
}

impl Notifier {
    pub fn new(kind: NotifierKind) -> Self {
        debug!(?kind, "notifier created");
        Self {
            kind,
            #[cfg(not(target_os = "windows"))]
            replace_id: 1001u32,
        }
    }

    pub fn kind(&self) -> NotifierKind {
        self.kind
    }

    #[cfg(not(target_os = "windows"))]
    async fn show_desktop(&mut self, note: &Note) -> Result<(), String> {
        let urgency = if note.urgent {
            notify_rust::Urgency::Critical
        } else {
            notify_rust::Urgency::Normal
        };
        let mut n = notify_rust::Notification::new();
        n.appname(APP_NAME)
            .summary(&note.summary)
            .body(&note.body)
            .id(self.replace_id)
            .urgency(urgency)
            .show_async()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    #[cfg(target_os = "windows")]
    async fn show_desktop(&mut self, note: &Note) -> Result<(), String> {
        use tauri_winrt_notification::Toast;
        let note = note.clone();
        tokio::task::spawn_blocking(move || {
            Toast::new(Toast::POWERSHELL_APP_ID)
                .title(&note.summary)
                .text1(&note.body)
                .show()
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[async_trait]
impl NotificationBackend for Notifier {
    async fn show(&mut self, note: &Note) {
        if self.kind == NotifierKind::Desktop {
            match self.show_desktop(note).await {
                Ok(()) => {
                    debug!(summary=%note.summary, "notification shown");
                    return;
                }
                Err(e) => {
                    warn!(error=%e, "desktop notification failed; downgrading to LogOnly notifier");
                    self.kind = NotifierKind::LogOnly;
                }
            }
        }
        info!("[NOTIFY] {}: {}", note.summary, note.body);
    }
}

pub fn default_backend(enabled: bool) -> Box<dyn NotificationBackend> {
    let kind = if enabled {
        NotifierKind::Desktop
    } else {
        NotifierKind::LogOnly
    };
    Box::new(Notifier::new(kind))
}
