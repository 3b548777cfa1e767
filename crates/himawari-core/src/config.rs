//! Ingest configuration from environment variables
//!
//! 起動時に一度だけ組み立て、`Arc<IngestConfig>` として各コンポーネントの
//! コンストラクタに渡します。実行中に書き換えることはありません。

use chrono::Duration;
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;

use crate::domain::{Combo, DEFAULT_COMBOS, DEFAULT_SECTORS, Namespace, RetentionPolicy, Sector};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Remote file server.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// `host:port`
    pub host: String,
    /// Directory the `/hsd/...` tree lives under.
    pub root: String,
    pub username: String,
    pub password: SecretString,
    pub connect_timeout: std::time::Duration,
}

/// Durable store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub namespace: Namespace,
}

/// Where committed objects live.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Root directory of the local object store.
    Local { root: PathBuf },
    /// S3 互換 API の bucket（GCS の interoperability endpoint も可）
    Bucket(BucketConfig),
}

#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint, e.g. `https://storage.googleapis.com` or MinIO.
    pub endpoint: Option<String>,
    /// Static HMAC credentials; the default provider chain is used when absent.
    pub credentials: Option<BucketCredentials>,
    /// Key prefix applied in front of every object name.
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BucketCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Notification topic.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub project_id: String,
    pub topic: String,
    pub endpoint: String,
    /// Forwarded as a bearer token when present.
    pub access_token: Option<SecretString>,
}

impl NotifierConfig {
    /// `projects/{project}/topics/{topic}`
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic)
    }
}

/// What one batch looks at.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub lookback: u32,
    pub step: Duration,
    pub combos: Vec<Combo>,
    pub sectors: Vec<Sector>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lookback: 4,
            step: Duration::minutes(10),
            combos: DEFAULT_COMBOS.to_vec(),
            sectors: DEFAULT_SECTORS.to_vec(),
        }
    }
}

/// Configuration for the whole process.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub notifier: NotifierConfig,
    pub schedule: ScheduleConfig,
    pub retention: RetentionPolicy,
    /// Deadline of the latest-artifact read.
    pub latest_deadline: std::time::Duration,
    pub listen_port: u16,
}

pub const DEFAULT_FTP_HOST: &str = "ftp.ptree.jaxa.jp:21";
pub const DEFAULT_FTP_ROOT: &str = "/jma";
pub const DEFAULT_BUCKET_REGION: &str = "auto";
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const DEFAULT_PORT: u16 = 8080;

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `HIMAWARI_STORE_BUCKET` (optional; selects the bucket store)
    ///   - `HIMAWARI_S3_REGION` (default: auto), `HIMAWARI_S3_ENDPOINT`, `HIMAWARI_STORE_PREFIX`
    ///   - `HIMAWARI_S3_ACCESS_KEY_ID`, `HIMAWARI_S3_SECRET_ACCESS_KEY` (both or neither)
    /// - `HIMAWARI_STORE_DIR` (required unless a bucket is set)
    /// - `HIMAWARI_FTP_HOST` (default: ftp.ptree.jaxa.jp:21)
    /// - `HIMAWARI_FTP_ROOT` (default: /jma)
    /// - `HIMAWARI_FTP_USER`, `HIMAWARI_FTP_PASSWORD` (required)
    /// - `HIMAWARI_PROJECT_ID`, `HIMAWARI_TOPIC` (required)
    /// - `HIMAWARI_PUBSUB_ENDPOINT` (default: https://pubsub.googleapis.com)
    /// - `HIMAWARI_PUBSUB_TOKEN` (optional)
    /// - `PORT` (default: 8080)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`IngestConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let listen_port = match get("PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        let backend = match get("HIMAWARI_STORE_BUCKET") {
            Some(bucket) => {
                let credentials = match (
                    get("HIMAWARI_S3_ACCESS_KEY_ID"),
                    get("HIMAWARI_S3_SECRET_ACCESS_KEY"),
                ) {
                    (Some(access_key_id), Some(secret)) => Some(BucketCredentials {
                        access_key_id,
                        secret_access_key: SecretString::from(secret),
                    }),
                    (None, None) => None,
                    (Some(_), None) => {
                        return Err(ConfigError::Missing("HIMAWARI_S3_SECRET_ACCESS_KEY"));
                    }
                    (None, Some(_)) => return Err(ConfigError::Missing("HIMAWARI_S3_ACCESS_KEY_ID")),
                };
                StoreBackend::Bucket(BucketConfig {
                    bucket,
                    region: get("HIMAWARI_S3_REGION")
                        .unwrap_or_else(|| DEFAULT_BUCKET_REGION.to_string()),
                    endpoint: get("HIMAWARI_S3_ENDPOINT"),
                    credentials,
                    prefix: get("HIMAWARI_STORE_PREFIX"),
                })
            }
            None => StoreBackend::Local {
                root: PathBuf::from(required("HIMAWARI_STORE_DIR")?),
            },
        };

        Ok(Self {
            remote: RemoteConfig {
                host: get("HIMAWARI_FTP_HOST").unwrap_or_else(|| DEFAULT_FTP_HOST.to_string()),
                root: get("HIMAWARI_FTP_ROOT").unwrap_or_else(|| DEFAULT_FTP_ROOT.to_string()),
                username: required("HIMAWARI_FTP_USER")?,
                password: SecretString::from(required("HIMAWARI_FTP_PASSWORD")?),
                connect_timeout: std::time::Duration::from_secs(5),
            },
            store: StoreConfig {
                backend,
                namespace: Namespace::default(),
            },
            notifier: NotifierConfig {
                project_id: required("HIMAWARI_PROJECT_ID")?,
                topic: required("HIMAWARI_TOPIC")?,
                endpoint: get("HIMAWARI_PUBSUB_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_PUBSUB_ENDPOINT.to_string()),
                access_token: get("HIMAWARI_PUBSUB_TOKEN").map(SecretString::from),
            },
            schedule: ScheduleConfig::default(),
            retention: RetentionPolicy::default(),
            latest_deadline: std::time::Duration::from_secs(5),
            listen_port,
        })
    }
}
