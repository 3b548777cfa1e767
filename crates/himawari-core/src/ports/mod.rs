//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。
//! 外部システム（FTP サーバ、object store、Pub/Sub）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - app 層は trait object（`Arc<dyn ...>`）だけを見る
//! - テストでは impls の in-memory 実装に差し替える

pub mod artifact_store;
pub mod clock;
pub mod id_generator;
pub mod notifier;
pub mod remote_source;

pub use self::artifact_store::{ArtifactStore, ArtifactWriter, ObjectMeta, ObjectReader, validate_name};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{ChangeNotifier, Notification};
pub use self::remote_source::{RemoteBody, RemoteSession, RemoteSource};
