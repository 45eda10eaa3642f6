//! User-facing notifications (toasts).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const RECENT_TOASTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Fan-out of toasts to live listeners, plus a short history for pages
/// rendered after the fact.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Toast>,
    recent: Arc<Mutex<VecDeque<Toast>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_TOASTS))),
        }
    }

    pub fn notify(&self, level: ToastLevel, title: impl Into<String>, message: impl Into<String>) {
        let toast = Toast {
            level,
            title: title.into(),
            message: message.into(),
            at: Utc::now(),
        };
        match level {
            ToastLevel::Error => error!(title = %toast.title, "{}", toast.message),
            ToastLevel::Warning => warn!(title = %toast.title, "{}", toast.message),
            ToastLevel::Success | ToastLevel::Info => {
                info!(title = %toast.title, "{}", toast.message)
            }
        }
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() == RECENT_TOASTS {
                recent.pop_front();
            }
            recent.push_back(toast.clone());
        }
        // Nobody listening is fine.
        let _ = self.tx.send(toast);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    /// Most recent toasts, newest last.
    pub fn recent(&self) -> Vec<Toast> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
