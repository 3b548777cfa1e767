//! Status - 保存済み artifact の一覧
//!
//! raw / rendered 両方の prefix を読み、名前から key が分かるものは
//! capture time などを添えて返します。

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;

use crate::domain::{ArtifactKey, ContentClass, Namespace, StoreError};
use crate::ports::{ArtifactStore, ObjectMeta};

/// One stored object, as shown by `stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub class: ContentClass,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<u8>,
}

impl ArtifactSummary {
    fn new(meta: ObjectMeta, class: ContentClass) -> Self {
        let key = ArtifactKey::parse_object_name(&meta.name);
        Self {
            class,
            created_at: meta.created_at,
            size: meta.size,
            capture_time: key.as_ref().map(ArtifactKey::capture_time),
            band: key.as_ref().map(|k| k.band.0),
            resolution: key.as_ref().map(|k| k.resolution.0),
            sector: key.as_ref().map(|k| k.sector.0),
            name: meta.name,
        }
    }
}

pub struct ArtifactCatalog {
    store: Arc<dyn ArtifactStore>,
    namespace: Namespace,
}

impl ArtifactCatalog {
    pub fn new(store: Arc<dyn ArtifactStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    /// Every object under either prefix, ordered by capture time then name.
    pub async fn summaries(&self) -> Result<Vec<ArtifactSummary>, StoreError> {
        let mut out = Vec::new();
        for class in [ContentClass::Raw, ContentClass::Rendered] {
            let prefix = self.namespace.prefix_of(class);
            let mut listing = self.store.list(&prefix);
            while let Some(meta) = listing.try_next().await? {
                out.push(ArtifactSummary::new(meta, class));
            }
        }
        out.sort_by(|a, b| (a.capture_time, &a.name).cmp(&(b.capture_time, &b.name)));
        Ok(out)
    }
}
