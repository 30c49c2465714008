//! User-visible notifications after mutations
//!
//! Mirrors the platform notification model: a permission that starts as
//! `Default`, can be requested once, and gates every `show`.

use crate::error::CrmError;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// Not yet asked.
    #[default]
    Default,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl NotificationOptions {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            tag: None,
        }
    }
}

/// Presentation-side notification sink.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    /// Ask for permission. Only a `Default` permission can change.
    fn request_permission(&self) -> NotificationPermission;

    /// Display a notification. Returns false when it was suppressed because
    /// permission is not `Granted`.
    fn show(&self, title: &str, options: NotificationOptions) -> bool;
}

/// Report a mutation outcome. The result itself is untouched; callers still
/// propagate the error so forms can keep unsaved input.
pub fn notify_outcome<T>(
    notifier: Option<&dyn Notifier>,
    success_title: &str,
    failure_title: &str,
    result: &Result<T, CrmError>,
) {
    let Some(notifier) = notifier else {
        return;
    };
    match result {
        Ok(_) => {
            notifier.show(success_title, NotificationOptions::default());
        }
        Err(e) => {
            notifier.show(failure_title, NotificationOptions::body(e.to_string()));
        }
    }
}

/// Notifier that writes notifications to the log.
///
/// `request_permission` grants unless constructed with `deny_requests`.
#[derive(Debug)]
pub struct TracingNotifier {
    permission: Mutex<NotificationPermission>,
    grant_on_request: bool,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(NotificationPermission::Default),
            grant_on_request: true,
        }
    }

    pub fn granted() -> Self {
        Self {
            permission: Mutex::new(NotificationPermission::Granted),
            grant_on_request: true,
        }
    }

    pub fn deny_requests() -> Self {
        Self {
            permission: Mutex::new(NotificationPermission::Default),
            grant_on_request: false,
        }
    }
}

impl Default for TracingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for TracingNotifier {
    fn permission(&self) -> NotificationPermission {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_permission(&self) -> NotificationPermission {
        let mut permission = self.permission.lock().unwrap_or_else(PoisonError::into_inner);
        if *permission == NotificationPermission::Default {
            *permission = if self.grant_on_request {
                NotificationPermission::Granted
            } else {
                NotificationPermission::Denied
            };
        }
        *permission
    }

    fn show(&self, title: &str, options: NotificationOptions) -> bool {
        if self.permission() != NotificationPermission::Granted {
            warn!(title, "Notification suppressed: permission not granted");
            return false;
        }
        info!(
            title,
            body = options.body.as_deref().unwrap_or(""),
            tag = options.tag.as_deref().unwrap_or(""),
            "Notification"
        );
        true
    }
}

/// Notifier that records what it showed, for tests and previews.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    permission: Mutex<NotificationPermission>,
    shown: Mutex<Vec<(String, NotificationOptions)>>,
}

impl RecordingNotifier {
    pub fn granted() -> Self {
        Self {
            permission: Mutex::new(NotificationPermission::Granted),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<(String, NotificationOptions)> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.shown().into_iter().map(|(title, _)| title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn permission(&self) -> NotificationPermission {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_permission(&self) -> NotificationPermission {
        let mut permission = self.permission.lock().unwrap_or_else(PoisonError::into_inner);
        if *permission == NotificationPermission::Default {
            *permission = NotificationPermission::Granted;
        }
        *permission
    }

    fn show(&self, title: &str, options: NotificationOptions) -> bool {
        if self.permission() != NotificationPermission::Granted {
            return false;
        }
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), options));
        true
    }
}
