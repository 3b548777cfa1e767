//! Remote fetch & decode
//!
//! remote の body を bzip2 で展開しながら、固定長の chunk 単位で store の writer に流します。
//! 全体をメモリに載せることはありません。
//!
//! # エラーの扱い
//! - body の読み出し・展開の失敗 → `RemoteError::Transfer`
//! - writer の失敗 → `StoreError`
//! - どちらの場合も writer は abort され、object は見えないまま

use async_compression::tokio::bufread::BzDecoder;
use tokio::io::{AsyncReadExt, BufReader};

use crate::domain::{ArtifactKey, FetchOutcome, IngestError, RemoteError};
use crate::ports::{ArtifactStore, ArtifactWriter, RemoteBody, RemoteSession};

/// Chunk size of the decode loop.
pub const DECODE_CHUNK_SIZE: usize = 4 * 1024;

/// Retrieves `key` over `session` and stores it as `name`.
///
/// Returns `NotYetAvailable` without touching the store when the remote file does not exist.
pub async fn fetch_and_store(
    session: &mut dyn RemoteSession,
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    name: &str,
) -> Result<FetchOutcome, IngestError> {
    let path = key.remote_path();
    let Some(body) = session.retrieve(&path).await? else {
        tracing::debug!(%key, %path, "remote file not yet available");
        return Ok(FetchOutcome::NotYetAvailable);
    };

    let mut writer = store.create(name).await?;
    match decode_into(body, writer.as_mut(), &path).await {
        Ok(decoded) => {
            let meta = writer.commit().await?;
            tracing::info!(%key, name = %meta.name, decoded, "artifact stored");
            Ok(FetchOutcome::Stored)
        }
        Err(e) => {
            writer.abort().await;
            Err(e)
        }
    }
}

/// Streams the decompressed `body` into `writer`; returns the decoded size.
pub async fn decode_into(
    body: RemoteBody,
    writer: &mut dyn ArtifactWriter,
    path: &str,
) -> Result<u64, IngestError> {
    let mut decoder = BzDecoder::new(BufReader::with_capacity(DECODE_CHUNK_SIZE, body));
    // 連結された bzip2 stream を最後まで展開する
    decoder.multiple_members(true);
    let mut buf = [0u8; DECODE_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = decoder
            .read(&mut buf)
            .await
            .map_err(|e| RemoteError::Transfer {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        if n == 0 {
            return Ok(total);
        }
        writer.write(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{Combo, Sector, StoreError};
    use crate::impls::{InMemoryArtifactStore, InMemoryRemoteSource};
    use crate::ports::{FixedClock, RemoteSource};
    use async_compression::tokio::bufread::BzEncoder;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    pub(crate) async fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        BzEncoder::new(data).read_to_end(&mut out).await.unwrap();
        out
    }

    fn key() -> ArtifactKey {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        ArtifactKey::new(t, Combo::new(1, 10), Sector(7))
    }

    fn store() -> InMemoryArtifactStore {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap();
        InMemoryArtifactStore::new(Arc::new(FixedClock::new(t)))
    }

    #[tokio::test]
    async fn decodes_in_bounded_chunks() {
        let payload: Vec<u8> = (0..100_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let remote = InMemoryRemoteSource::new();
        remote.publish(&key().remote_path(), bzip2(&payload).await);
        let store = store();

        let mut session = remote.connect().await.unwrap();
        let name = key().object_name("himawari8");
        let outcome = fetch_and_store(session.as_mut(), &store, &key(), &name).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Stored);
        assert_eq!(store.get(&name).await.unwrap().as_ref(), payload.as_slice());
        assert!(store.largest_write() <= DECODE_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn concatenated_streams_are_all_decoded() {
        let mut compressed = bzip2(b"first-stream|").await;
        compressed.extend(bzip2(b"second-stream").await);
        let remote = InMemoryRemoteSource::new();
        remote.publish(&key().remote_path(), compressed);
        let store = store();

        let mut session = remote.connect().await.unwrap();
        let name = key().object_name("himawari8");
        let outcome = fetch_and_store(session.as_mut(), &store, &key(), &name).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Stored);
        assert_eq!(
            store.get(&name).await.unwrap().as_ref(),
            b"first-stream|second-stream"
        );
    }

    #[tokio::test]
    async fn missing_remote_file_creates_nothing() {
        let remote = InMemoryRemoteSource::new();
        let store = store();

        let mut session = remote.connect().await.unwrap();
        let name = key().object_name("himawari8");
        let outcome = fetch_and_store(session.as_mut(), &store, &key(), &name).await.unwrap();

        assert_eq!(outcome, FetchOutcome::NotYetAvailable);
        assert!(store.names().await.is_empty());
    }

    #[tokio::test]
    async fn broken_transfer_leaves_no_object() {
        let payload = vec![7u8; 64 * 1024];
        let remote = InMemoryRemoteSource::new();
        remote.publish(&key().remote_path(), bzip2(&payload).await);
        remote.break_transfer(&key().remote_path());
        let store = store();

        let mut session = remote.connect().await.unwrap();
        let name = key().object_name("himawari8");
        let err = fetch_and_store(session.as_mut(), &store, &key(), &name).await.unwrap_err();

        assert!(matches!(err, IngestError::Remote(RemoteError::Transfer { .. })));
        assert!(store.names().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_transfer_error() {
        let remote = InMemoryRemoteSource::new();
        remote.publish(&key().remote_path(), b"definitely not bzip2".to_vec());
        let store = store();

        let mut session = remote.connect().await.unwrap();
        let name = key().object_name("himawari8");
        let err = fetch_and_store(session.as_mut(), &store, &key(), &name).await.unwrap_err();

        assert!(matches!(err, IngestError::Remote(RemoteError::Transfer { .. })));
        assert!(store.names().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_object_name_is_rejected_before_decoding() {
        let remote = InMemoryRemoteSource::new();
        remote.publish(&key().remote_path(), bzip2(b"x").await);
        let store = store();

        let mut session = remote.connect().await.unwrap();
        let err = fetch_and_store(session.as_mut(), &store, &key(), "../escape").await.unwrap_err();

        assert!(matches!(err, IngestError::Store(StoreError::InvalidName { .. })));
    }
}
