//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **IngestionRunner**: batch 1 回分（存在確認 → 取得・展開・保存 → 通知 → sweep）
//! - **RetentionSweeper**: 期限切れ object の削除
//! - **LatestReader**: 最新 rendered image の期限つき読み出し
//! - **ArtifactCatalog**: 保存済み artifact の一覧

pub mod builder;
pub mod fetch;
pub mod idempotency;
pub mod ingest;
pub mod latest;
pub mod status;
pub mod sweeper;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::idempotency::Presence;
pub use self::ingest::{BatchReport, IngestionRunner};
pub use self::latest::{LatestArtifact, LatestReader};
pub use self::status::{ArtifactCatalog, ArtifactSummary};
pub use self::sweeper::{RetentionSweeper, SweepReport};
