//! IngestionRunner - ingestion batch 1 回分
//!
//! # フロー
//! 1. 現在時刻から schedule を作る（新しい時刻から順）
//! 2. (timestamp, sector) group ごとに、各 combo について
//!    - store に object があれば何もしない（remote には触れない）
//!    - 無ければ remote から取得して展開・保存
//! 3. group の結果を fold し、新しい artifact があれば 1 回だけ通知
//! 4. 最後に retention sweep
//!
//! # 保証
//! - 処理は完全に逐次（1 key ずつ）
//! - remote session は最初に取得が必要になった時点で開き、batch の終わりに必ず閉じる
//! - 通知の失敗で batch は止まるが、保存済みの object は戻さない

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

use crate::app::fetch;
use crate::app::idempotency::{self, Presence};
use crate::app::sweeper::{RetentionSweeper, SweepReport};
use crate::config::ScheduleConfig;
use crate::domain::{
    ArtifactKey, BatchId, FetchOutcome, GroupOutcome, IngestError, Namespace, Schedule,
};
use crate::ports::{
    ArtifactStore, ChangeNotifier, Clock, IdGenerator, Notification, RemoteSession, RemoteSource,
};

/// Counts of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub stored: usize,
    pub already_present: usize,
    pub not_yet_available: usize,
    pub groups_notified: usize,
    pub swept: SweepReport,
}

impl BatchReport {
    fn new(batch_id: BatchId, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            started_at,
            stored: 0,
            already_present: 0,
            not_yet_available: 0,
            groups_notified: 0,
            swept: SweepReport::default(),
        }
    }

    fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::AlreadyPresent => self.already_present += 1,
            FetchOutcome::NotYetAvailable => self.not_yet_available += 1,
            FetchOutcome::Stored => self.stored += 1,
        }
    }
}

pub struct IngestionRunner {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn ChangeNotifier>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    sweeper: Arc<RetentionSweeper>,
    schedule: ScheduleConfig,
    namespace: Namespace,
}

impl IngestionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn ChangeNotifier>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        sweeper: Arc<RetentionSweeper>,
        schedule: ScheduleConfig,
        namespace: Namespace,
    ) -> Self {
        Self {
            remote,
            store,
            notifier,
            clock,
            ids,
            sweeper,
            schedule,
            namespace,
        }
    }

    /// Runs one batch over the lookback window ending now.
    pub async fn run_batch(&self) -> Result<BatchReport, IngestError> {
        let batch_id = self.ids.generate_batch_id();
        let span = tracing::info_span!("ingest_batch", batch_id = %batch_id);
        self.run_batch_inner(batch_id).instrument(span).await
    }

    async fn run_batch_inner(&self, batch_id: BatchId) -> Result<BatchReport, IngestError> {
        let now = self.clock.now();
        let schedule = Schedule::new(
            now,
            self.schedule.lookback,
            self.schedule.step,
            &self.schedule.combos,
            &self.schedule.sectors,
        );
        tracing::info!(keys = schedule.len(), %now, "ingestion batch started");

        let mut report = BatchReport::new(batch_id, now);
        let mut session: Option<Box<dyn RemoteSession>> = None;

        let result = self.process(&schedule, &mut session, &mut report).await;

        if let Some(session) = session.take() {
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "closing remote session failed");
            }
        }
        if let Err(e) = result {
            tracing::error!(error = %e, kind = ?e.kind(), "ingestion batch aborted");
            return Err(e);
        }

        report.swept = self.sweeper.sweep().await?;

        tracing::info!(
            stored = report.stored,
            already_present = report.already_present,
            not_yet_available = report.not_yet_available,
            groups_notified = report.groups_notified,
            swept = report.swept.deleted(),
            "ingestion batch finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        schedule: &Schedule,
        session: &mut Option<Box<dyn RemoteSession>>,
        report: &mut BatchReport,
    ) -> Result<(), IngestError> {
        for group in schedule.groups() {
            let mut outcomes = Vec::with_capacity(group.keys.len());
            for key in &group.keys {
                let outcome = self.ingest_key(key, session).await?;
                report.record(outcome);
                outcomes.push(outcome);
            }

            let group = GroupOutcome::fold(&group, outcomes);
            if !group.any_new() {
                continue;
            }
            let notification = Notification::new(group.payload())
                .with_attribute("sector", format!("{:02}", group.sector.0));
            let message_id = self.notifier.publish(&notification).await?;
            report.groups_notified += 1;
            tracing::info!(
                payload = %notification.payload,
                sector = %group.sector,
                %message_id,
                "change notification published"
            );
        }
        Ok(())
    }

    async fn ingest_key(
        &self,
        key: &ArtifactKey,
        slot: &mut Option<Box<dyn RemoteSession>>,
    ) -> Result<FetchOutcome, IngestError> {
        let name = key.object_name(&self.namespace.raw_prefix);
        if let Presence::Exists(_) = idempotency::check(self.store.as_ref(), &name).await? {
            tracing::debug!(%name, "already present");
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let mut session = match slot.take() {
            Some(session) => session,
            None => self.remote.connect().await?,
        };
        let outcome = fetch::fetch_and_store(session.as_mut(), self.store.as_ref(), key, &name).await;
        *slot = Some(session);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fetch::tests::bzip2;
    use crate::domain::{Combo, NotifyError, RemoteError, RetentionPolicy, Sector, StoreError};
    use crate::impls::{InMemoryArtifactStore, InMemoryRemoteSource, RecordingNotifier, RemoteErrorKind};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{Duration, TimeZone};

    struct Harness {
        remote: Arc<InMemoryRemoteSource>,
        store: Arc<InMemoryArtifactStore>,
        notifier: Arc<RecordingNotifier>,
        runner: IngestionRunner,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 3, 0).unwrap()
    }

    fn capture() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    /// One timestamp, two combos, two sectors.
    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(now()));
        let remote = Arc::new(InMemoryRemoteSource::new());
        let store = Arc::new(InMemoryArtifactStore::new(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let sweeper = Arc::new(RetentionSweeper::new(
            store.clone(),
            clock.clone(),
            Namespace::default(),
            RetentionPolicy::default(),
        ));
        let schedule = ScheduleConfig {
            lookback: 1,
            step: Duration::minutes(10),
            combos: vec![Combo::new(1, 10), Combo::new(3, 5)],
            sectors: vec![Sector(7), Sector(8)],
        };
        let runner = IngestionRunner::new(
            remote.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
            sweeper,
            schedule,
            Namespace::default(),
        );
        Harness {
            remote,
            store,
            notifier,
            runner,
        }
    }

    fn key(band: u8, resolution: u8, sector: u8) -> ArtifactKey {
        ArtifactKey::new(capture(), Combo::new(band, resolution), Sector(sector))
    }

    #[tokio::test]
    async fn notifies_once_per_group_with_new_data() {
        let h = harness();
        h.remote.publish(&key(1, 10, 7).remote_path(), bzip2(b"b01").await);
        h.remote.publish(&key(3, 5, 7).remote_path(), bzip2(b"b03").await);

        let report = h.runner.run_batch().await.unwrap();

        assert_eq!(report.stored, 2);
        assert_eq!(report.not_yet_available, 2);
        assert_eq!(report.groups_notified, 1);
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, "20240101_1200");
        assert_eq!(sent[0].attributes.get("sector").map(String::as_str), Some("07"));
        assert!(report.batch_id.starts_with("batch-"));
    }

    #[tokio::test]
    async fn second_run_fetches_nothing_and_notifies_nothing() {
        let h = harness();
        for k in [key(1, 10, 7), key(3, 5, 7), key(1, 10, 8), key(3, 5, 8)] {
            h.remote.publish(&k.remote_path(), bzip2(k.file_stem().as_bytes()).await);
        }
        h.runner.run_batch().await.unwrap();
        let fetched = h.remote.retrieved().len();

        let report = h.runner.run_batch().await.unwrap();

        assert_eq!(report.already_present, 4);
        assert_eq!(report.stored, 0);
        assert_eq!(h.remote.retrieved().len(), fetched);
        assert_eq!(h.remote.sessions_opened(), 1);
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn one_session_per_batch_closed_at_the_end() {
        let h = harness();
        h.runner.run_batch().await.unwrap();

        assert_eq!(h.remote.sessions_opened(), 1);
        assert_eq!(h.remote.sessions_closed(), 1);
        assert_eq!(h.remote.retrieved().len(), 4);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_aborts_before_any_remote_contact() {
        let h = harness();
        h.store.fail_head("backend unavailable").await;

        let err = h.runner.run_batch().await.unwrap_err();

        assert!(matches!(err, IngestError::Store(StoreError::Metadata { .. })));
        assert_eq!(h.remote.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_batch() {
        let h = harness();
        h.remote.refuse_connections(RemoteErrorKind::Auth);

        let err = h.runner.run_batch().await.unwrap_err();

        assert!(matches!(err, IngestError::Remote(RemoteError::Auth(_))));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn mid_transfer_failure_closes_the_session() {
        let h = harness();
        let k = key(1, 10, 7);
        h.remote.publish(&k.remote_path(), bzip2(&vec![1u8; 32 * 1024]).await);
        h.remote.break_transfer(&k.remote_path());

        let err = h.runner.run_batch().await.unwrap_err();

        assert!(matches!(err, IngestError::Remote(RemoteError::Transfer { .. })));
        assert_eq!(h.remote.sessions_closed(), h.remote.sessions_opened());
        assert!(h.store.names().await.is_empty());
    }

    #[tokio::test]
    async fn notify_failure_keeps_stored_artifacts() {
        let h = harness();
        let k = key(1, 10, 7);
        h.remote.publish(&k.remote_path(), bzip2(b"b01").await);
        h.notifier.reject_all();

        let err = h.runner.run_batch().await.unwrap_err();

        assert!(matches!(err, IngestError::Notify(NotifyError::Rejected { .. })));
        assert!(h.store.get(&k.object_name("himawari8")).await.is_some());
        assert_eq!(h.remote.sessions_closed(), 1);
    }
}
