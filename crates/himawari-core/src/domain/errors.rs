//! Errors - エラー型と分類
//!
//! 関心ごとに enum を分け、batch 全体は [`IngestError`] にまとめます。
//!
//! | 種類 | 型 | batch への影響 |
//! |---|---|---|
//! | 接続・認証・転送中の失敗 | [`RemoteError`] | 中断 |
//! | ファイル未公開 | （エラーではない）`FetchOutcome::NotYetAvailable` | 継続 |
//! | store の失敗 | [`StoreError`] | 中断 |
//! | 通知の失敗 | [`NotifyError`] | 中断（保存済みは戻さない） |
//! | latest 読み出しの期限切れ | [`ReadError::Timeout`] | 呼び出し側へ |

use std::time::Duration;

use thiserror::Error;

/// ErrorKind は呼び出し層向けの運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 次回の起動で回復しうる（ネットワーク、期限切れ）
    Transient,
    /// 入力や設定が誤っている
    Permanent,
    /// store / broker 側の障害
    Infrastructure,
}

/// Failure talking to the remote file server.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connect to {host} failed: {message}")]
    Connect { host: String, message: String },

    #[error("login rejected: {0}")]
    Auth(String),

    #[error("transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },
}

/// Failure of a durable store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("metadata lookup for {name} failed: {source}")]
    Metadata {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write to {name} failed: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("commit of {name} failed: {source}")]
    Commit {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read of {name} failed: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("delete of {name} failed: {source}")]
    Delete {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listing {prefix:?} failed: {source}")]
    List {
        prefix: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to get a change notification acknowledged.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("publish request failed: {0}")]
    Request(String),

    #[error("broker rejected publish with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("broker returned no message id")]
    NotAcknowledged,
}

/// Error of an ingestion batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Remote(RemoteError::Auth(_)) => ErrorKind::Permanent,
            IngestError::Remote(_) => ErrorKind::Transient,
            IngestError::Store(StoreError::InvalidName { .. }) => ErrorKind::Permanent,
            IngestError::Store(_) | IngestError::Notify(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Error of the latest-artifact read.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no artifact found under {prefix:?}")]
    NotFound { prefix: String },

    #[error("latest read did not finish within {0:?}")]
    Timeout(Duration),

    #[error("latest read was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("writing to the output sink failed: {0}")]
    Sink(#[source] std::io::Error),
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::NotFound { .. } => ErrorKind::Permanent,
            ReadError::Timeout(_) | ReadError::Cancelled | ReadError::Sink(_) => ErrorKind::Transient,
            ReadError::Store(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_permanent() {
        let err = IngestError::from(RemoteError::Auth("530 Login incorrect.".to_string()));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn transfer_failures_are_transient() {
        let err = IngestError::from(RemoteError::Transfer {
            path: "/jma/hsd/x.bz2".to_string(),
            message: "connection reset".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().contains("/jma/hsd/x.bz2"));
    }

    #[test]
    fn notify_failures_are_infrastructure() {
        let err = IngestError::from(NotifyError::NotAcknowledged);
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
