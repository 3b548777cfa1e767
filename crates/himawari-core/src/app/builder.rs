//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::app::ingest::IngestionRunner;
use crate::app::latest::LatestReader;
use crate::app::status::ArtifactCatalog;
use crate::app::sweeper::RetentionSweeper;
use crate::config::IngestConfig;
use crate::ports::{
    ArtifactStore, ChangeNotifier, Clock, IdGenerator, RemoteSource, SystemClock, UlidGenerator,
};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .remote(Arc::new(FtpRemoteSource::new(config.remote.clone())))
///     .store(store)
///     .notifier(Arc::new(PubSubNotifier::new(&config.notifier)?))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - remote / store / notifier は必須
/// - build() 時に未設定のものをまとめて BuildError で返す
/// - clock / id generator は省略時に SystemClock / UlidGenerator
pub struct AppBuilder {
    config: Arc<IngestConfig>,
    remote: Option<Arc<dyn RemoteSource>>,
    store: Option<Arc<dyn ArtifactStore>>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These must be provided before build().")]
    Missing(Vec<&'static str>),
}

impl AppBuilder {
    pub fn new(config: impl Into<Arc<IngestConfig>>) -> Self {
        Self {
            config: config.into(),
            remote: None,
            store: None,
            notifier: None,
            clock: None,
            ids: None,
        }
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - remote / store / notifier が全て設定されているかチェック
    /// - 不足があれば BuildError::Missing を返す
    pub fn build(self) -> Result<App, BuildError> {
        let (remote, store, notifier) = match (self.remote, self.store, self.notifier) {
            (Some(remote), Some(store), Some(notifier)) => (remote, store, notifier),
            (remote, store, notifier) => {
                let missing = [
                    ("remote", remote.is_none()),
                    ("store", store.is_none()),
                    ("notifier", notifier.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, missing)| missing.then_some(name))
                .collect();
                return Err(BuildError::Missing(missing));
            }
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let config = self.config;

        let sweeper = Arc::new(RetentionSweeper::new(
            store.clone(),
            clock.clone(),
            config.store.namespace.clone(),
            config.retention,
        ));
        let ingest = IngestionRunner::new(
            remote,
            store.clone(),
            notifier,
            clock,
            ids,
            sweeper.clone(),
            config.schedule.clone(),
            config.store.namespace.clone(),
        );
        let latest = LatestReader::new(
            store.clone(),
            config.store.namespace.clone(),
            config.latest_deadline,
        );
        let catalog = ArtifactCatalog::new(store, config.store.namespace.clone());

        Ok(App {
            config,
            ingest,
            latest,
            catalog,
            sweeper,
        })
    }
}

/// App はアプリケーションのランタイム
///
/// 起動時に一度だけ組み立て、CLI / HTTP の各入口から共有します。
pub struct App {
    pub config: Arc<IngestConfig>,
    pub ingest: IngestionRunner,
    pub latest: LatestReader,
    pub catalog: ArtifactCatalog,
    pub sweeper: Arc<RetentionSweeper>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryArtifactStore, InMemoryRemoteSource, RecordingNotifier};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn config() -> IngestConfig {
        IngestConfig::from_lookup(|name| {
            let value = match name {
                "HIMAWARI_STORE_DIR" => "/tmp/himawari",
                "HIMAWARI_FTP_USER" => "user",
                "HIMAWARI_FTP_PASSWORD" => "pw",
                "HIMAWARI_PROJECT_ID" => "proj",
                "HIMAWARI_TOPIC" => "topic",
                _ => return None,
            };
            Some(value.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_build_success() {
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let app = AppBuilder::new(config())
            .remote(Arc::new(InMemoryRemoteSource::new()))
            .store(Arc::new(InMemoryArtifactStore::new(clock.clone())))
            .notifier(Arc::new(RecordingNotifier::new()))
            .clock(clock)
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_components() {
        let app = AppBuilder::new(config())
            .notifier(Arc::new(RecordingNotifier::new()))
            .build();
        assert!(matches!(
            app,
            Err(BuildError::Missing(missing)) if missing == vec!["remote", "store"]
        ));
    }
}
