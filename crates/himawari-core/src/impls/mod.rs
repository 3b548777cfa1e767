//! Impls - ports の実装
//!
//! # 本番用
//! - **FtpRemoteSource**: JAXA P-Tree FTP
//! - **LocalArtifactStore**: staging + rename で commit するローカル object store
//! - **BucketArtifactStore**: S3 互換 bucket（PUT / multipart complete で commit）
//! - **PubSubNotifier**: Pub/Sub REST publish
//!
//! # テスト・開発用
//! - **InMemoryRemoteSource** / **InMemoryArtifactStore** / **RecordingNotifier**

pub mod bucket_store;
pub mod ftp_source;
pub mod local_store;
pub mod memory_notifier;
pub mod memory_source;
pub mod memory_store;
pub mod pubsub_notifier;

pub use self::bucket_store::BucketArtifactStore;
pub use self::ftp_source::FtpRemoteSource;
pub use self::local_store::LocalArtifactStore;
pub use self::memory_notifier::RecordingNotifier;
pub use self::memory_source::{InMemoryRemoteSource, RemoteErrorKind};
pub use self::memory_store::InMemoryArtifactStore;
pub use self::pubsub_notifier::PubSubNotifier;
