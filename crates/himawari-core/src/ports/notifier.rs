//! ChangeNotifier port - 新着通知
//!
//! # 実装
//! - `impls::PubSubNotifier`: Google Cloud Pub/Sub REST（本番用）
//! - `impls::RecordingNotifier`: 送信内容を記録するだけ（テスト用）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::NotifyError;

/// Message published when a (timestamp, sector) group produced new data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Capture time as `YYYYMMDD_HHMM`.
    pub payload: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// ChangeNotifier は broker に通知を送る
///
/// `publish` は broker の受領（message id）を待ってから返ること。
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Returns the broker-assigned message id.
    async fn publish(&self, notification: &Notification) -> Result<String, NotifyError>;
}
