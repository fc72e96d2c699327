//! User-visible notifications.
//!
//! Checkout and reconciliation push advisory messages through a
//! fire-and-forget sink the embedder supplies at engine construction.
//! Notifications are not part of the consistency contract; a missing
//! listener is replaced by a no-op sink and never panics.

use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            message: message.into(),
        }
    }
}

/// Fire-and-forget notification callback.
pub type NotificationSink = Arc<dyn Fn(Notification) + Send + Sync>;

/// Sink that drops every notification.
pub fn null_sink() -> NotificationSink {
    Arc::new(|_| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn null_sink_accepts_everything() {
        let sink = null_sink();
        sink(Notification::success("ok"));
        sink(Notification::error("bad"));
        sink(Notification::info("fyi"));
    }

    #[test]
    fn sink_receives_notifications_in_order() {
        let seen: Arc<Mutex<Vec<Notification>>> = Arc::new(Mutex::new(vec![]));
        let seen_clone = seen.clone();
        let sink: NotificationSink = Arc::new(move |n| seen_clone.lock().unwrap().push(n));

        sink(Notification::info("first"));
        sink(Notification::success("second"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, NotificationKind::Info);
        assert_eq!(seen[1].message, "second");
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_value(Notification::success("done")).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["message"], "done");
    }
}
