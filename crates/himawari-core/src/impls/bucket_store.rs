//! BucketArtifactStore - S3 互換 API の object bucket
//!
//! object 名 `himawari8/<stem>` は `<prefix>himawari8/<stem>` という key になります。
//! GCS は interoperability endpoint (`https://storage.googleapis.com`) と HMAC key で使えます。
//!
//! # commit
//! - [`PART_SIZE`] 未満の object: commit 時に 1 回の PUT
//! - それ以上: multipart upload。`CompleteMultipartUpload` が成功した時点で初めて見える
//! - abort / drop された writer は multipart upload を破棄する
//!
//! writer がメモリに持つのは最大 1 part 分だけです。

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Object};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use secrecy::ExposeSecret;
use std::io;
use std::sync::Arc;

use crate::config::BucketConfig;
use crate::domain::StoreError;
use crate::ports::{ArtifactStore, ArtifactWriter, ObjectMeta, ObjectReader, validate_name};

/// Size of one multipart upload part (S3 requires at least 5 MiB for all but the last).
pub const PART_SIZE: usize = 8 * 1024 * 1024;

struct Bucket {
    client: Client,
    bucket: String,
    prefix: String,
}

impl Bucket {
    fn key(&self, name: &str) -> Result<String, StoreError> {
        validate_name(name)?;
        Ok(format!("{}{name}", self.prefix))
    }

    /// Object name of a listed key; `None` for keys outside the prefix or with unsafe names.
    fn name_of<'k>(&self, key: &'k str) -> Option<&'k str> {
        let name = key.strip_prefix(self.prefix.as_str())?;
        validate_name(name).ok().map(|_| name)
    }

    fn meta_of(&self, object: &Object) -> Option<ObjectMeta> {
        let name = self.name_of(object.key()?)?;
        Some(ObjectMeta {
            name: name.to_string(),
            created_at: object.last_modified().and_then(to_utc)?,
            size: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
        })
    }

    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let key = self.key(name)?;
        let metadata_err = |source| StoreError::Metadata {
            name: name.to_string(),
            source,
        };
        let out = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => return Ok(None),
            Err(e) => return Err(metadata_err(sdk_io(e))),
        };
        let created_at = out
            .last_modified()
            .and_then(to_utc)
            .ok_or_else(|| metadata_err(io::Error::other("object has no last-modified time")))?;
        Ok(Some(ObjectMeta {
            name: name.to_string(),
            created_at,
            size: out
                .content_length()
                .and_then(|s| u64::try_from(s).ok())
                .unwrap_or(0),
        }))
    }
}

fn to_utc(t: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(t.secs(), t.subsec_nanos())
}

fn sdk_io<E: std::error::Error>(e: E) -> io::Error {
    io::Error::other(DisplayErrorContext(e).to_string())
}

/// `"a/b"` → `"a/b/"`; empty stays empty.
fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim().trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

pub struct BucketArtifactStore {
    inner: Arc<Bucket>,
}

impl BucketArtifactStore {
    #[tracing::instrument(level = "debug", skip(cfg), fields(bucket = %cfg.bucket))]
    pub async fn connect(cfg: &BucketConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(cfg.region.clone()));
        if let Some(creds) = &cfg.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.expose_secret().to_string(),
                None,
                None,
                "himawari_static",
            ));
        }
        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3 = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(cfg.endpoint.is_some())
            .build();
        Self::from_client(Client::from_conf(s3), cfg.bucket.clone(), cfg.prefix.as_deref())
    }

    pub fn from_client(client: Client, bucket: String, prefix: Option<&str>) -> Self {
        Self {
            inner: Arc::new(Bucket {
                client,
                bucket,
                prefix: normalize_prefix(prefix),
            }),
        }
    }
}

struct Page {
    token: Option<String>,
    done: bool,
}

#[async_trait]
impl ArtifactStore for BucketArtifactStore {
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        self.inner.head(name).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn create(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, StoreError> {
        let key = self.inner.key(name)?;
        Ok(Box::new(BucketWriter {
            bucket: self.inner.clone(),
            name: name.to_string(),
            key,
            buffer: Vec::new(),
            upload: None,
            finished: false,
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta, StoreError>> {
        let bucket = &self.inner;
        let scoped = format!("{}{prefix}", bucket.prefix);
        let start = Page {
            token: None,
            done: false,
        };
        stream::try_unfold(start, move |page| {
            let scoped = scoped.clone();
            async move {
                if page.done {
                    return Ok(None);
                }
                let mut req = bucket
                    .client
                    .list_objects_v2()
                    .bucket(&bucket.bucket)
                    .prefix(scoped);
                if let Some(token) = page.token {
                    req = req.continuation_token(token);
                }
                let resp = req.send().await.map_err(sdk_io)?;
                let token = resp
                    .is_truncated()
                    .unwrap_or(false)
                    .then(|| resp.next_continuation_token().map(str::to_string))
                    .flatten();
                let objects: Vec<ObjectMeta> =
                    resp.contents().iter().filter_map(|o| bucket.meta_of(o)).collect();
                let next = Page {
                    done: token.is_none(),
                    token,
                };
                Ok::<_, io::Error>(Some((objects, next)))
            }
        })
        .map_ok(|objects| stream::iter(objects.into_iter().map(Ok::<_, io::Error>)))
        .try_flatten()
        .map_err(move |source| StoreError::List {
            prefix: prefix.to_string(),
            source,
        })
        .boxed()
    }

    async fn open(&self, name: &str) -> Result<Option<ObjectReader>, StoreError> {
        let key = self.inner.key(name)?;
        match self
            .inner
            .client
            .get_object()
            .bucket(&self.inner.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(Box::new(Box::pin(out.body.into_async_read())))),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => Ok(None),
            Err(e) => Err(StoreError::Read {
                name: name.to_string(),
                source: sdk_io(e),
            }),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let key = self.inner.key(name)?;
        self.inner
            .client
            .delete_object()
            .bucket(&self.inner.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Delete {
                name: name.to_string(),
                source: sdk_io(e),
            })?;
        Ok(())
    }
}

struct Upload {
    id: String,
    parts: Vec<CompletedPart>,
}

struct BucketWriter {
    bucket: Arc<Bucket>,
    name: String,
    key: String,
    buffer: Vec<u8>,
    upload: Option<Upload>,
    finished: bool,
}

impl BucketWriter {
    fn write_err(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            name: self.name.clone(),
            source,
        }
    }

    fn commit_err(&self, source: io::Error) -> StoreError {
        StoreError::Commit {
            name: self.name.clone(),
            source,
        }
    }

    /// Uploads the buffered bytes as the next part, starting the upload if needed.
    async fn flush_part(&mut self) -> io::Result<()> {
        let b = &self.bucket;
        if self.upload.is_none() {
            let out = b
                .client
                .create_multipart_upload()
                .bucket(&b.bucket)
                .key(&self.key)
                .send()
                .await
                .map_err(sdk_io)?;
            let id = out
                .upload_id()
                .ok_or_else(|| io::Error::other("no upload id returned"))?
                .to_string();
            tracing::debug!(name = %self.name, upload_id = %id, "multipart upload started");
            self.upload = Some(Upload {
                id,
                parts: Vec::new(),
            });
        }
        let Some(upload) = self.upload.as_mut() else {
            return Err(io::Error::other("multipart upload missing"));
        };

        let part_number = i32::try_from(upload.parts.len() + 1)
            .map_err(|_| io::Error::other("too many parts"))?;
        let body = std::mem::take(&mut self.buffer);
        let out = b
            .client
            .upload_part()
            .bucket(&b.bucket)
            .key(&self.key)
            .upload_id(&upload.id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_io)?;
        upload.parts.push(
            CompletedPart::builder()
                .set_e_tag(out.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn publish(&mut self) -> io::Result<()> {
        let Some(upload) = self.upload.as_ref() else {
            let body = std::mem::take(&mut self.buffer);
            self.bucket
                .client
                .put_object()
                .bucket(&self.bucket.bucket)
                .key(&self.key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(sdk_io)?;
            return Ok(());
        };
        if !self.buffer.is_empty() || upload.parts.is_empty() {
            self.flush_part().await?;
        }
        let Some(upload) = self.upload.as_ref() else {
            return Err(io::Error::other("multipart upload missing"));
        };
        self.bucket
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket.bucket)
            .key(&self.key)
            .upload_id(&upload.id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(upload.parts.clone()))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_io)?;
        Ok(())
    }

    async fn abort_upload(&mut self) {
        self.finished = true;
        let Some(upload) = self.upload.take() else {
            return;
        };
        let result = self
            .bucket
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket.bucket)
            .key(&self.key)
            .upload_id(&upload.id)
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(name = %self.name, error = %DisplayErrorContext(e), "failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ArtifactWriter for BucketWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        if self.finished {
            return Err(self.write_err(io::Error::other("writer already closed")));
        }
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() >= PART_SIZE {
            if let Err(e) = self.flush_part().await {
                return Err(self.write_err(e));
            }
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<ObjectMeta, StoreError> {
        if self.finished {
            return Err(self.commit_err(io::Error::other("writer already closed")));
        }
        if let Err(e) = self.publish().await {
            self.abort_upload().await;
            return Err(self.commit_err(e));
        }
        self.finished = true;
        self.upload = None;

        match self.bucket.head(&self.name).await {
            Ok(Some(meta)) => Ok(meta),
            Ok(None) => Err(self.commit_err(io::Error::other("object missing after commit"))),
            Err(e) => Err(e),
        }
    }

    async fn abort(mut self: Box<Self>) {
        self.abort_upload().await;
    }
}

impl Drop for BucketWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(upload) = self.upload.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let request = self
                .bucket
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket.bucket)
                .key(&self.key)
                .upload_id(upload.id);
            handle.spawn(async move {
                let _ = request.send().await;
            });
        }
    }
}
