//! RetentionSweeper - 期限切れ object の削除
//!
//! # フロー
//! 1. store 全体を stream で一覧する（全件をメモリに載せない）
//! 2. 名前から content class を決める
//! 3. `now - created_at > threshold` なら削除
//!
//! 最初の削除失敗でその場で止め、エラーを呼び出し側に返します。

use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;

use crate::domain::{ContentClass, Namespace, RetentionPolicy, StoreError};
use crate::ports::{ArtifactStore, Clock};

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted_raw: usize,
    pub deleted_rendered: usize,
}

impl SweepReport {
    pub fn deleted(&self) -> usize {
        self.deleted_raw + self.deleted_rendered
    }
}

pub struct RetentionSweeper {
    store: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    namespace: Namespace,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        namespace: Namespace,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            namespace,
            policy,
        }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut objects = self.store.list("");

        while let Some(meta) = objects.try_next().await? {
            report.scanned += 1;
            let class = self.namespace.classify(&meta.name);
            if !self.policy.is_expired(class, meta.created_at, now) {
                continue;
            }
            self.store.delete(&meta.name).await?;
            tracing::debug!(name = %meta.name, ?class, created_at = %meta.created_at, "expired object deleted");
            match class {
                ContentClass::Raw => report.deleted_raw += 1,
                ContentClass::Rendered => report.deleted_rendered += 1,
            }
        }

        tracing::info!(
            scanned = report.scanned,
            deleted = report.deleted(),
            "retention sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryArtifactStore;
    use crate::ports::FixedClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn sweeper(store: Arc<InMemoryArtifactStore>) -> RetentionSweeper {
        RetentionSweeper::new(
            store,
            Arc::new(FixedClock::new(now())),
            Namespace::default(),
            RetentionPolicy::default(),
        )
    }

    #[rstest]
    #[case::raw_fresh("himawari8/a", 30, true)]
    #[case::raw_at_threshold("himawari8/a", 60, true)]
    #[case::raw_expired("himawari8/a", 61, false)]
    #[case::raw_two_hours("himawari8/a", 120, false)]
    #[case::rendered_two_hours("himawari8-rendered/a.png", 120, true)]
    #[case::rendered_at_threshold("himawari8-rendered/a.png", 24 * 60, true)]
    #[case::rendered_expired("himawari8-rendered/a.png", 24 * 60 + 1, false)]
    #[tokio::test]
    async fn deletes_only_objects_older_than_their_threshold(
        #[case] name: &str,
        #[case] age_minutes: i64,
        #[case] retained: bool,
    ) {
        let store = Arc::new(InMemoryArtifactStore::new(Arc::new(FixedClock::new(now()))));
        store
            .insert(name, now() - Duration::minutes(age_minutes), "x")
            .await;

        let report = sweeper(store.clone()).sweep().await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(store.get(name).await.is_some(), retained);
        assert_eq!(report.deleted(), usize::from(!retained));
    }

    #[tokio::test]
    async fn first_delete_failure_stops_the_sweep() {
        let store = Arc::new(InMemoryArtifactStore::new(Arc::new(FixedClock::new(now()))));
        let old = now() - Duration::hours(3);
        store.insert("himawari8/a", old, "x").await;
        store.insert("himawari8/b", old, "x").await;
        store.fail_delete("himawari8/a").await;

        let err = sweeper(store.clone()).sweep().await.unwrap_err();

        assert!(matches!(err, StoreError::Delete { ref name, .. } if name == "himawari8/a"));
        // listing is name-ordered in memory, so b was never reached
        assert!(store.get("himawari8/b").await.is_some());
    }
}
