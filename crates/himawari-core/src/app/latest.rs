//! LatestReader - 最新の rendered image を期限つきで読み出す
//!
//! # 実装詳細
//! - 期限（既定 5 秒）と競争させる。期限が先に来たら即座に `ReadError::Timeout`
//! - 期限切れ時は子 token を cancel し、一覧・コピーの loop はそれを見て止まる
//! - 呼び出し側の token を cancel した場合は `ReadError::Cancelled`
//! - 「最新」は created_at の比較で決める（一覧の順序には依存しない）。同時刻なら名前順で後ろ
//! - コピーは 4 KiB の buffer を通す

use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::domain::{ArtifactKey, ContentClass, Namespace, ReadError, Sector, StoreError};
use crate::ports::{ArtifactStore, ObjectMeta};

/// Buffer size of the copy loop.
pub const COPY_CHUNK_SIZE: usize = 4 * 1024;

/// Default deadline of one read.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// What was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestArtifact {
    pub meta: ObjectMeta,
    pub bytes_copied: u64,
}

pub struct LatestReader {
    store: Arc<dyn ArtifactStore>,
    namespace: Namespace,
    deadline: Duration,
}

impl LatestReader {
    pub fn new(store: Arc<dyn ArtifactStore>, namespace: Namespace, deadline: Duration) -> Self {
        Self {
            store,
            namespace,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Copies the newest rendered image (optionally of one sector) into `sink`.
    #[tracing::instrument(level = "info", skip(self, sink, cancel))]
    pub async fn read_latest<W>(
        &self,
        sector: Option<Sector>,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<LatestArtifact, ReadError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let token = cancel.child_token();
        let result = match tokio::time::timeout(self.deadline, self.copy_latest(sector, sink, &token)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(deadline = ?self.deadline, "latest read timed out");
                Err(ReadError::Timeout(self.deadline))
            }
        };
        token.cancel();
        result
    }

    /// Newest candidate, without reading it.
    pub async fn find_latest(
        &self,
        sector: Option<Sector>,
        token: &CancellationToken,
    ) -> Result<ObjectMeta, ReadError> {
        let prefix = self.namespace.prefix_of(ContentClass::Rendered);
        let mut listing = self.store.list(&prefix);
        let mut best: Option<ObjectMeta> = None;

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(ReadError::Cancelled),
                next = listing.try_next() => next?,
            };
            let Some(meta) = next else { break };
            if let Some(sector) = sector {
                let matches = ArtifactKey::parse_object_name(&meta.name).is_some_and(|k| k.sector == sector);
                if !matches {
                    continue;
                }
            }
            if best
                .as_ref()
                .is_none_or(|b| (meta.created_at, &meta.name) > (b.created_at, &b.name))
            {
                best = Some(meta);
            }
        }

        drop(listing);
        best.ok_or(ReadError::NotFound { prefix })
    }

    async fn copy_latest<W>(
        &self,
        sector: Option<Sector>,
        sink: &mut W,
        token: &CancellationToken,
    ) -> Result<LatestArtifact, ReadError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let meta = self.find_latest(sector, token).await?;
        let mut reader = self
            .store
            .open(&meta.name)
            .await?
            // swept between listing and open
            .ok_or_else(|| ReadError::NotFound {
                prefix: meta.name.clone(),
            })?;

        let mut buf = [0u8; COPY_CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = tokio::select! {
                _ = token.cancelled() => return Err(ReadError::Cancelled),
                n = reader.read(&mut buf) => n.map_err(|source| StoreError::Read {
                    name: meta.name.clone(),
                    source,
                })?,
            };
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await.map_err(ReadError::Sink)?;
            copied += n as u64;
        }
        sink.flush().await.map_err(ReadError::Sink)?;

        tracing::debug!(name = %meta.name, copied, "latest artifact served");
        Ok(LatestArtifact {
            meta,
            bytes_copied: copied,
        })
    }
}
