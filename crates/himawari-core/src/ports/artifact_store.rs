//! ArtifactStore port - durable object storage (local filesystem / bucket / in-memory)
//!
//! # 設計原則
//! - object は commit した瞬間にだけ見える（書きかけは誰にも見えない）
//! - commit 後は不変。削除は retention sweeper だけが行う
//! - 一覧は stream で返す（全件をメモリに載せない）
//!
//! # 実装
//! - `impls::LocalArtifactStore`: staging + rename による atomic commit（本番用）
//! - `impls::BucketArtifactStore`: S3 互換 bucket、PUT / multipart complete で commit（本番用）
//! - `impls::InMemoryArtifactStore`: テスト・開発用

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::domain::StoreError;

/// Metadata of a committed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Streaming reader over a committed object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// ArtifactStore は decode 済みの artifact を保存する
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Metadata of `name`, `Ok(None)` if no committed object has that name.
    ///
    /// Only a definite "does not exist" may come back as `Ok(None)`; every other failure
    /// must surface as an error.
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Opens a writer that will publish `name` on [`ArtifactWriter::commit`].
    async fn create(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, StoreError>;

    /// Committed objects whose name starts with `prefix`. Order is unspecified.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta, StoreError>>;

    /// Streaming reader for `name`, `Ok(None)` if it does not exist.
    async fn open(&self, name: &str) -> Result<Option<ObjectReader>, StoreError>;

    /// Removes `name`. Removing an object that is already gone is not an error.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Streaming sink for one object.
///
/// Dropping a writer without calling `commit` discards everything written so far.
#[async_trait]
pub trait ArtifactWriter: Send {
    fn name(&self) -> &str;

    async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError>;

    /// Sole commit point: the object becomes visible only if this returns `Ok`.
    async fn commit(self: Box<Self>) -> Result<ObjectMeta, StoreError>;

    /// Discards the write explicitly.
    async fn abort(self: Box<Self>);
}

/// Rejects names that could escape the store root or collide with staging.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = |reason| {
        Err(StoreError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.trim().is_empty() {
        return invalid("name is empty");
    }
    if name.starts_with('/') {
        return invalid("name must not start with '/'");
    }
    if name.contains('\\') {
        return invalid("name must not contain '\\'");
    }
    if name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return invalid("name must not contain empty, '.' or '..' segments");
    }
    if name.starts_with('.') {
        return invalid("names starting with '.' are reserved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("himawari8/HS_H08_20240101_1200_B01_FLDK_R10_S0710")]
    #[case("himawari8-rendered/a.png")]
    fn accepts_object_names(#[case] name: &str) {
        assert!(validate_name(name).is_ok());
    }

    #[rstest]
    #[case::empty("")]
    #[case::absolute("/etc/passwd")]
    #[case::parent("himawari8/../secret")]
    #[case::double_slash("himawari8//x")]
    #[case::staging(".staging/x.part")]
    #[case::backslash("a\\b")]
    fn rejects_unsafe_names(#[case] name: &str) {
        assert!(matches!(validate_name(name), Err(StoreError::InvalidName { .. })));
    }
}
