//! himawari-core
//!
//! Core building blocks for the Himawari-8 ingestion pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, key, schedule, retention, outcome, errors）
//! - **ports**: 抽象化レイヤー（RemoteSource, ArtifactStore, ChangeNotifier, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, ingest, fetch, sweeper, latest, status）
//! - **impls**: 実装（FTP, ローカル object store, Pub/Sub と、テスト用の in-memory 版）
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use self::app::{App, AppBuilder};
pub use self::config::IngestConfig;
