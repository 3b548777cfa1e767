//! RemoteSource port - 公開サーバ（JAXA P-Tree FTP）へのセッション
//!
//! # 設計原則
//! - 「ファイルがまだ無い」はエラーではなく `Ok(None)`
//! - 接続・認証・転送中の失敗だけが `RemoteError`
//! - session は batch の終わりに必ず `close` する。close されずに drop された場合も
//!   接続は解放されること（実装側の責務）

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::domain::RemoteError;

/// Compressed bytes of one remote file, streamed.
pub type RemoteBody = Box<dyn AsyncRead + Send + Unpin>;

/// Opens authenticated sessions.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// One authenticated session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Starts retrieving `path` (as built by `ArtifactKey::remote_path`).
    ///
    /// The returned body must be read to the end (or dropped) before the next call.
    async fn retrieve(&mut self, path: &str) -> Result<Option<RemoteBody>, RemoteError>;

    /// Ends the session.
    async fn close(self: Box<Self>) -> Result<(), RemoteError>;
}
