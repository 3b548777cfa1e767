//! RecordingNotifier - 受け取った通知を記録するだけの notifier（テスト用）

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::domain::NotifyError;
use crate::ports::{ChangeNotifier, Notification};

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    next_id: AtomicU64,
    reject: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledged notifications, in publish order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Every later publish fails without being recorded.
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn publish(&self, notification: &Notification) -> Result<String, NotifyError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "broker unavailable".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }
}
