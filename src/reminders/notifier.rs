use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::Notification;
use crate::store::{notifications, Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    MentionExpired,
    CheckInDue,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::MentionExpired => "mention_expired",
            NoticeKind::CheckInDue => "check_in_due",
        }
    }

    fn resource_type(&self) -> &'static str {
        match self {
            NoticeKind::MentionExpired => "post_mention",
            NoticeKind::CheckInDue => "space",
        }
    }
}

/// One reminder addressed to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub user_id: String,
    pub resource_id: String,
    pub title: String,
    pub body: String,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Delivery seam for reminders. Called outside any store transaction.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Writes reminders into the `notifications` inbox table
pub struct StoreNotifier {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl StoreNotifier {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl Notifier for StoreNotifier {
    fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: notice.user_id.clone(),
            notification_type: notice.kind.as_str().to_string(),
            resource_type: Some(notice.kind.resource_type().to_string()),
            resource_id: Some(notice.resource_id.clone()),
            title: notice.title.clone(),
            body: notice.body.clone(),
            read: false,
            created_at: self.clock.now(),
        };
        self.store
            .read(|c| notifications::insert_notification(c, &notification))?;
        log::debug!("Queued {} notice for {}", notice.kind.as_str(), notice.user_id);
        Ok(())
    }
}
