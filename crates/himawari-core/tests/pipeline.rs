//! End-to-end runs over in-memory ports and a real local store.

use async_compression::tokio::bufread::BzEncoder;
use chrono::{DateTime, Duration, TimeZone, Utc};
use himawari_core::config::IngestConfig;
use himawari_core::domain::{ArtifactKey, Combo, Sector};
use himawari_core::impls::{
    InMemoryArtifactStore, InMemoryRemoteSource, LocalArtifactStore, RecordingNotifier,
};
use himawari_core::ports::{ArtifactStore, Clock, FixedClock, UlidGenerator};
use himawari_core::{App, AppBuilder};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

async fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    BzEncoder::new(data).read_to_end(&mut out).await.unwrap();
    out
}

fn config(store_dir: &str) -> IngestConfig {
    let store_dir = store_dir.to_string();
    IngestConfig::from_lookup(move |name| match name {
        "HIMAWARI_STORE_DIR" => Some(store_dir.clone()),
        "HIMAWARI_FTP_USER" => Some("anonymous".to_string()),
        "HIMAWARI_FTP_PASSWORD" => Some("secret".to_string()),
        "HIMAWARI_PROJECT_ID" => Some("proj".to_string()),
        "HIMAWARI_TOPIC" => Some("himawari8".to_string()),
        _ => None,
    })
    .unwrap()
}

/// 12:00 capture, observed a few minutes later.
fn t() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

struct Pipeline {
    app: App,
    clock: Arc<FixedClock>,
    remote: Arc<InMemoryRemoteSource>,
    notifier: Arc<RecordingNotifier>,
}

fn pipeline(store: Arc<dyn ArtifactStore>, clock: Arc<FixedClock>) -> Pipeline {
    let remote = Arc::new(InMemoryRemoteSource::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let mut config = config("/unused");
    config.schedule.lookback = 1;
    let app = AppBuilder::new(config)
        .remote(remote.clone())
        .store(store)
        .notifier(notifier.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Pipeline {
        app,
        clock,
        remote,
        notifier,
    }
}

fn memory_pipeline() -> (Pipeline, Arc<InMemoryArtifactStore>) {
    let clock = Arc::new(FixedClock::new(t() + Duration::minutes(4)));
    let store = Arc::new(InMemoryArtifactStore::new(clock.clone()));
    (pipeline(store.clone(), clock), store)
}

fn key(band: u8, resolution: u8, sector: u8) -> ArtifactKey {
    ArtifactKey::new(t(), Combo::new(band, resolution), Sector(sector))
}

#[tokio::test]
async fn scenario_a_new_remote_file_is_stored_and_announced() {
    let (p, store) = memory_pipeline();
    p.remote
        .publish(&key(1, 10, 7).remote_path(), bzip2(b"full disk segment").await);

    let report = p.app.ingest.run_batch().await.unwrap();

    assert_eq!(report.stored, 1);
    let stored = store
        .get("himawari8/HS_H08_20240310_1200_B01_FLDK_R10_S0710")
        .await
        .unwrap();
    assert_eq!(&stored[..], b"full disk segment");
    assert_eq!(
        p.remote.retrieved()[0],
        "/hsd/202403/10/12/HS_H08_20240310_1200_B01_FLDK_R10_S0710.DAT.bz2"
    );

    let sent = p.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload, "20240310_1200");
}

#[tokio::test]
async fn scenario_b_absent_remote_file_is_not_an_error() {
    let (p, store) = memory_pipeline();

    let report = p.app.ingest.run_batch().await.unwrap();

    // 4 combos x 3 sectors, nothing published yet
    assert_eq!(report.not_yet_available, 12);
    assert!(store.names().await.is_empty());
    assert!(p.notifier.sent().is_empty());
}

#[tokio::test]
async fn scenario_c_present_keys_open_no_remote_session() {
    let (p, store) = memory_pipeline();
    for combo in [(1, 10), (2, 10), (3, 5), (4, 10)] {
        for sector in [7, 8, 9] {
            let k = key(combo.0, combo.1, sector);
            store.insert(&k.object_name("himawari8"), t(), "already here").await;
        }
    }

    let report = p.app.ingest.run_batch().await.unwrap();

    assert_eq!(report.already_present, 12);
    assert_eq!(p.remote.sessions_opened(), 0);
    assert!(p.remote.retrieved().is_empty());
    assert!(p.notifier.sent().is_empty());
}

#[tokio::test]
async fn scenario_d_retention_differs_by_content_class() {
    let (p, store) = memory_pipeline();
    let two_hours_ago = p.clock.now() - Duration::hours(2);
    store
        .insert("himawari8/HS_H08_20240310_1000_B01_FLDK_R10_S0710", two_hours_ago, "raw")
        .await;
    store
        .insert(
            "himawari8-rendered/HS_H08_20240310_1000_B01_FLDK_R10_S0710.png",
            two_hours_ago,
            "png",
        )
        .await;

    let report = p.app.sweeper.sweep().await.unwrap();

    assert_eq!(report.deleted_raw, 1);
    assert_eq!(report.deleted_rendered, 0);
    assert_eq!(
        store.names().await,
        vec!["himawari8-rendered/HS_H08_20240310_1000_B01_FLDK_R10_S0710.png"]
    );
}

#[tokio::test]
async fn notification_iff_group_has_a_new_artifact() {
    let (p, store) = memory_pipeline();
    // sector 7: one new; sector 8: only an existing one; sector 9: nothing
    p.remote
        .publish(&key(2, 10, 7).remote_path(), bzip2(b"b02").await);
    store
        .insert(&key(1, 10, 8).object_name("himawari8"), t(), "existing")
        .await;

    p.app.ingest.run_batch().await.unwrap();

    let sent = p.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attributes.get("sector").map(String::as_str), Some("07"));
}

#[tokio::test]
async fn local_store_round_trip_through_ingest_and_latest() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(t() + Duration::minutes(4)));
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let store = Arc::new(LocalArtifactStore::init(dir.path().to_path_buf(), ids).await.unwrap());
    let p = pipeline(store.clone(), clock.clone());

    let payload: Vec<u8> = (0..50_000u32).flat_map(|i| i.to_be_bytes()).collect();
    p.remote
        .publish(&key(3, 5, 9).remote_path(), bzip2(&payload).await);

    p.app.ingest.run_batch().await.unwrap();
    let second = p.app.ingest.run_batch().await.unwrap();
    assert_eq!(second.stored, 0);
    assert_eq!(second.already_present, 1);
    let path = key(3, 5, 9).remote_path();
    assert_eq!(p.remote.retrieved().iter().filter(|p| **p == path).count(), 1);

    let raw = dir
        .path()
        .join("himawari8/HS_H08_20240310_1200_B03_FLDK_R05_S0910");
    assert_eq!(tokio::fs::read(&raw).await.unwrap(), payload);

    // a renderer drops an image next to it
    let rendered = key(3, 5, 9).rendered_name("himawari8-rendered");
    let mut writer = store.create(&rendered).await.unwrap();
    writer.write(b"\x89PNG").await.unwrap();
    writer.commit().await.unwrap();

    let mut out = Vec::new();
    let served = p
        .app
        .latest
        .read_latest(Some(Sector(9)), &mut out, &Default::default())
        .await
        .unwrap();
    assert_eq!(served.meta.name, rendered);
    assert_eq!(out, b"\x89PNG");
}
