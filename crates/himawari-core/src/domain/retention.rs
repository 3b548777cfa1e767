//! Retention - content class ごとの保持期限
//!
//! content class は object 名の規約だけで決まります（metadata を引かない）。
//! - rendered prefix 配下、または `.png` で終わるもの → Rendered
//! - それ以外 → Raw

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of payload an object holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// Decoded Himawari Standard Data segment.
    Raw,
    /// Image produced by the downstream renderer.
    Rendered,
}

/// Object name prefixes for the two content classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub raw_prefix: String,
    pub rendered_prefix: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            raw_prefix: "himawari8".to_string(),
            rendered_prefix: "himawari8-rendered".to_string(),
        }
    }
}

impl Namespace {
    pub fn classify(&self, name: &str) -> ContentClass {
        let rendered_dir = format!("{}/", self.rendered_prefix.trim_end_matches('/'));
        if name.starts_with(&rendered_dir) || name.ends_with(".png") {
            ContentClass::Rendered
        } else {
            ContentClass::Raw
        }
    }

    /// Listing prefix for one class, always ending in `/`.
    pub fn prefix_of(&self, class: ContentClass) -> String {
        let prefix = match class {
            ContentClass::Raw => &self.raw_prefix,
            ContentClass::Rendered => &self.rendered_prefix,
        };
        format!("{}/", prefix.trim_end_matches('/'))
    }
}

/// Maximum age per content class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub raw: Duration,
    pub rendered: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw: Duration::hours(1),
            rendered: Duration::hours(24),
        }
    }
}

impl RetentionPolicy {
    pub fn threshold(&self, class: ContentClass) -> Duration {
        match class {
            ContentClass::Raw => self.raw,
            ContentClass::Rendered => self.rendered,
        }
    }

    /// An object is expired only when strictly older than its threshold.
    pub fn is_expired(&self, class: ContentClass, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created_at > self.threshold(class)
    }
}
