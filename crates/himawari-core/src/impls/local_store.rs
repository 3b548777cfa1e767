//! LocalArtifactStore - ファイルシステム上の object store
//!
//! object 名 `himawari8/<stem>` はそのまま `<root>/himawari8/<stem>` になります。
//!
//! # atomic commit
//! 1. `<root>/.staging/<staging-id>.part` に書く
//! 2. commit で flush + fsync
//! 3. 最終パスへ `rename`（同一ファイルシステム内なので atomic）
//!
//! commit されなかった writer は drop 時に staging ファイルを消します。
//! `.` で始まるエントリは一覧に出しません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, ReadDir};
use tokio::io::AsyncWriteExt;

use crate::domain::StoreError;
use crate::ports::{ArtifactStore, ArtifactWriter, IdGenerator, ObjectMeta, ObjectReader, validate_name};

const STAGING_DIR: &str = ".staging";

pub struct LocalArtifactStore {
    root: PathBuf,
    ids: Arc<dyn IdGenerator>,
}

impl LocalArtifactStore {
    /// Creates the root and staging directories if needed.
    #[tracing::instrument(level = "debug", skip(ids))]
    pub async fn init(root: PathBuf, ids: Arc<dyn IdGenerator>) -> Result<Self, StoreError> {
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|source| StoreError::Write {
                name: staging.display().to_string(),
                source,
            })?;
        Ok(Self { root, ids })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

fn object_meta(name: String, metadata: &std::fs::Metadata) -> io::Result<ObjectMeta> {
    let created_at: DateTime<Utc> = metadata.modified()?.into();
    Ok(ObjectMeta {
        name,
        created_at,
        size: metadata.len(),
    })
}

/// `<root>/a/b` → `a/b`; `None` for paths that are not valid UTF-8.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

struct Walk {
    root: PathBuf,
    prefix: String,
    pending: Vec<PathBuf>,
    current: Option<ReadDir>,
}

impl Walk {
    async fn next_object(&mut self) -> io::Result<Option<ObjectMeta>> {
        loop {
            let Some(dir) = self.current.as_mut() else {
                let Some(next) = self.pending.pop() else {
                    return Ok(None);
                };
                match fs::read_dir(&next).await {
                    Ok(dir) => self.current = Some(dir),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                continue;
            };

            let Some(entry) = dir.next_entry().await? else {
                self.current = None;
                continue;
            };
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                self.pending.push(path);
                continue;
            }
            let Some(name) = relative_name(&self.root, &path) else {
                continue;
            };
            if !file_type.is_file() || !name.starts_with(&self.prefix) {
                continue;
            }
            let metadata = entry.metadata().await?;
            return object_meta(name, &metadata).map(Some);
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let path = self.object_path(name)?;
        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => object_meta(name.to_string(), &m)
                .map(Some)
                .map_err(|source| StoreError::Metadata {
                    name: name.to_string(),
                    source,
                }),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Metadata {
                name: name.to_string(),
                source,
            }),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn create(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, StoreError> {
        let final_path = self.object_path(name)?;
        let staging_id = self.ids.generate_staging_id();
        let staging_path = self.root.join(STAGING_DIR).join(format!("{staging_id}.part"));
        let file = File::create(&staging_path)
            .await
            .map_err(|source| StoreError::Write {
                name: name.to_string(),
                source,
            })?;
        tracing::debug!(%staging_id, "staging write opened");
        Ok(Box::new(LocalWriter {
            name: name.to_string(),
            final_path,
            staging_path,
            file: Some(file),
            committed: false,
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta, StoreError>> {
        // start from the deepest directory the prefix pins down
        let start = match prefix.rsplit_once('/') {
            Some((dir, _)) if validate_name(dir).is_ok() => self.root.join(dir),
            _ => self.root.clone(),
        };
        let walk = Walk {
            root: self.root.clone(),
            prefix: prefix.to_string(),
            pending: vec![start],
            current: None,
        };
        stream::try_unfold(walk, |mut walk| async move {
            let next = walk.next_object().await?;
            Ok::<_, io::Error>(next.map(|meta| (meta, walk)))
        })
        .map(move |item: io::Result<ObjectMeta>| {
            item.map_err(|source| StoreError::List {
                prefix: prefix.to_string(),
                source,
            })
        })
        .boxed()
    }

    async fn open(&self, name: &str) -> Result<Option<ObjectReader>, StoreError> {
        let path = self.object_path(name)?;
        match File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                name: name.to_string(),
                source,
            }),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.object_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Delete {
                name: name.to_string(),
                source,
            }),
        }
    }
}

struct LocalWriter {
    name: String,
    final_path: PathBuf,
    staging_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LocalWriter {
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
}

#[async_trait]
impl ArtifactWriter for LocalWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        let Some(file) = self.file.as_mut() else {
            return Err(self.write_err(io::Error::other("writer already closed")));
        };
        match file.write_all(chunk).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.write_err(e)),
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<ObjectMeta, StoreError> {
        let Some(mut file) = self.file.take() else {
            return Err(self.commit_err(io::Error::other("writer already closed")));
        };
        if let Err(e) = file.flush().await {
            return Err(self.commit_err(e));
        }
        if let Err(e) = file.sync_all().await {
            return Err(self.commit_err(e));
        }
        drop(file);

        if let Some(parent) = self.final_path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return Err(self.commit_err(e));
            }
        }
        if let Err(e) = fs::rename(&self.staging_path, &self.final_path).await {
            return Err(self.commit_err(e));
        }
        self.committed = true;

        let metadata = match fs::metadata(&self.final_path).await {
            Ok(m) => m,
            Err(e) => return Err(self.commit_err(e)),
        };
        object_meta(self.name.clone(), &metadata).map_err(|e| self.commit_err(e))
    }

    async fn abort(mut self: Box<Self>) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.staging_path).await {
            tracing::warn!(name = %self.name, error = %e, "failed to remove staging file");
        }
        self.committed = true;
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SystemClock, UlidGenerator};
    use futures::TryStreamExt;
    use tokio::io::AsyncReadExt;

    async fn store(dir: &tempfile::TempDir) -> LocalArtifactStore {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
        LocalArtifactStore::init(dir.path().to_path_buf(), ids).await.unwrap()
    }

    async fn staging_entries(dir: &tempfile::TempDir) -> usize {
        let mut rd = fs::read_dir(dir.path().join(STAGING_DIR)).await.unwrap();
        let mut n = 0;
        while rd.next_entry().await.unwrap().is_some() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn commit_publishes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let mut writer = store.create("himawari8/seg").await.unwrap();
        writer.write(&[1u8; 4096]).await.unwrap();
        writer.write(&[2u8; 100]).await.unwrap();

        assert!(store.head("himawari8/seg").await.unwrap().is_none());
        assert_eq!(staging_entries(&dir).await, 1);

        let meta = writer.commit().await.unwrap();
        assert_eq!(meta.size, 4196);
        assert_eq!(store.head("himawari8/seg").await.unwrap().map(|m| m.size), Some(4196));
        assert_eq!(staging_entries(&dir).await, 0);

        let mut data = Vec::new();
        store
            .open("himawari8/seg")
            .await
            .unwrap()
            .unwrap()
            .read_to_end(&mut data)
            .await
            .unwrap();
        assert_eq!(data.len(), 4196);
        assert_eq!(data[4096], 2);
    }

    #[tokio::test]
    async fn dropped_writer_cleans_up_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let mut writer = store.create("himawari8/seg").await.unwrap();
        writer.write(b"partial").await.unwrap();
        drop(writer);

        assert_eq!(staging_entries(&dir).await, 0);
        assert!(store.head("himawari8/seg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn aborted_writer_cleans_up_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let mut writer = store.create("himawari8/seg").await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.abort().await;

        assert_eq!(staging_entries(&dir).await, 0);
    }

    #[tokio::test]
    async fn list_walks_nested_names_and_skips_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        for name in ["himawari8/a", "himawari8/b", "himawari8-rendered/a.png"] {
            let mut w = store.create(name).await.unwrap();
            w.write(b"x").await.unwrap();
            w.commit().await.unwrap();
        }
        // an in-flight write must not show up
        let _pending = store.create("himawari8/c").await.unwrap();

        let mut raw: Vec<String> = store
            .list("himawari8/")
            .map_ok(|m| m.name)
            .try_collect()
            .await
            .unwrap();
        raw.sort();
        assert_eq!(raw, vec!["himawari8/a", "himawari8/b"]);

        let all: Vec<ObjectMeta> = store.list("").try_collect().await.unwrap();
        assert_eq!(all.len(), 3);

        let none: Vec<ObjectMeta> = store.list("nothing/here/").try_collect().await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let mut w = store.create("himawari8/a").await.unwrap();
        w.write(b"x").await.unwrap();
        w.commit().await.unwrap();

        store.delete("himawari8/a").await.unwrap();
        store.delete("himawari8/a").await.unwrap();
        assert!(store.head("himawari8/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        assert!(matches!(
            store.create("../outside").await,
            Err(StoreError::InvalidName { .. })
        ));
    }
}
