//! Idempotency check
//!
//! object の存在確認だけを行います。「無い」と確定したときだけ取得に進み、
//! metadata の取得に失敗した場合は「有る」とも「無い」とも扱わずに batch を止めます。

use crate::domain::StoreError;
use crate::ports::{ArtifactStore, ObjectMeta};

/// Result of looking up one object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Exists(ObjectMeta),
    NotExists,
}

impl Presence {
    pub fn exists(&self) -> bool {
        matches!(self, Presence::Exists(_))
    }
}

pub async fn check(store: &dyn ArtifactStore, name: &str) -> Result<Presence, StoreError> {
    Ok(match store.head(name).await? {
        Some(meta) => Presence::Exists(meta),
        None => Presence::NotExists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryArtifactStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn store() -> InMemoryArtifactStore {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        InMemoryArtifactStore::new(Arc::new(FixedClock::new(t)))
    }

    #[tokio::test]
    async fn committed_object_exists() {
        let store = store();
        store.insert("himawari8/a", Utc::now(), "x").await;

        assert!(check(&store, "himawari8/a").await.unwrap().exists());
        assert_eq!(check(&store, "himawari8/b").await.unwrap(), Presence::NotExists);
    }

    #[tokio::test]
    async fn metadata_failure_is_not_treated_as_exists() {
        let store = store();
        store.insert("himawari8/a", Utc::now(), "x").await;
        store.fail_head("permission denied").await;

        let err = check(&store, "himawari8/a").await.unwrap_err();
        assert!(matches!(err, StoreError::Metadata { ref name, .. } if name == "himawari8/a"));
    }
}
