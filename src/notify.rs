use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::engine::Rejection;
use crate::engine::validator::BookingRequest;

const CHANNEL_CAPACITY: usize = 256;

/// Something an administrator or a user should hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    /// A user asked for a quota or lead-time rejection to be waived.
    LimitOverrideRequested {
        id: Ulid,
        user_id: Ulid,
        space_id: Ulid,
        date: String,
        start_time: String,
        end_time: String,
        rejection: Rejection,
        reason: String,
        requested_at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn user_id(&self) -> Ulid {
        match self {
            Notification::LimitOverrideRequested { user_id, .. } => *user_id,
        }
    }

    pub fn override_requested(
        req: &BookingRequest,
        user_id: Ulid,
        space_id: Ulid,
        rejection: Rejection,
        reason: String,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Notification::LimitOverrideRequested {
            id: Ulid::new(),
            user_id,
            space_id,
            date: req.date.clone().unwrap_or_default(),
            start_time: req.start_time.clone().unwrap_or_default(),
            end_time: req.end_time.clone().unwrap_or_default(),
            rejection,
            reason,
            requested_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Outbound delivery of notifications (email, chat, admin inbox, ...).
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// In-process broadcast of notifications. Administrators subscribe to
/// everything, a user only to their own.
pub struct NotifyHub {
    all: broadcast::Sender<Notification>,
    per_user: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            per_user: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Subscribe to one user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        self.per_user
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop a user's channel once nobody listens to it anymore.
    pub fn remove(&self, user_id: &Ulid) {
        self.per_user.remove_if(user_id, |_, tx| tx.receiver_count() == 0);
    }

    /// No-op if nobody is listening.
    pub fn send(&self, notification: &Notification) {
        let _ = self.all.send(notification.clone());
        if let Some(sender) = self.per_user.get(&notification.user_id()) {
            let _ = sender.send(notification.clone());
        }
    }
}

#[async_trait]
impl NotificationPort for NotifyHub {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(user_id = %notification.user_id(), "notification published");
        self.send(&notification);
        Ok(())
    }
}
