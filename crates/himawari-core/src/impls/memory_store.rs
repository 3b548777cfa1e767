//! InMemoryArtifactStore - 開発・テスト用の object store
//!
//! # 実装詳細
//! - BTreeMap<String, StoredObject> を tokio の Mutex で保護
//! - writer は自分専用のバッファに溜め、commit のときだけ map に入れる
//!   （commit 前の object は head / list / open から見えない）
//! - created_at は注入された Clock から取る
//! - テスト用に head / delete の失敗を差し込める

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::domain::StoreError;
use crate::ports::{ArtifactStore, ArtifactWriter, Clock, ObjectMeta, ObjectReader, validate_name};

#[derive(Debug, Clone)]
struct StoredObject {
    meta: ObjectMeta,
    data: Bytes,
}

#[derive(Debug, Default)]
struct Faults {
    head: Option<String>,
    delete: HashSet<String>,
}

pub struct InMemoryArtifactStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    clock: Arc<dyn Clock>,
    faults: Mutex<Faults>,
    largest_write: Arc<AtomicUsize>,
}

impl InMemoryArtifactStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            clock,
            faults: Mutex::new(Faults::default()),
            largest_write: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seeds a committed object with an explicit creation time.
    pub async fn insert(&self, name: &str, created_at: DateTime<Utc>, data: impl Into<Bytes>) {
        let data = data.into();
        let meta = ObjectMeta {
            name: name.to_string(),
            created_at,
            size: data.len() as u64,
        };
        self.objects
            .lock()
            .await
            .insert(name.to_string(), StoredObject { meta, data });
    }

    pub async fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.lock().await.get(name).map(|o| o.data.clone())
    }

    pub async fn names(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    /// Every subsequent `head` fails with `message`.
    pub async fn fail_head(&self, message: &str) {
        self.faults.lock().await.head = Some(message.to_string());
    }

    /// `delete(name)` fails from now on.
    pub async fn fail_delete(&self, name: &str) {
        self.faults.lock().await.delete.insert(name.to_string());
    }

    /// Size of the largest chunk any writer has received.
    pub fn largest_write(&self) -> usize {
        self.largest_write.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        if let Some(message) = &self.faults.lock().await.head {
            return Err(StoreError::Metadata {
                name: name.to_string(),
                source: io::Error::other(message.clone()),
            });
        }
        Ok(self.objects.lock().await.get(name).map(|o| o.meta.clone()))
    }

    async fn create(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, StoreError> {
        validate_name(name)?;
        Ok(Box::new(InMemoryWriter {
            name: name.to_string(),
            buf: Vec::new(),
            objects: self.objects.clone(),
            clock: self.clock.clone(),
            largest_write: self.largest_write.clone(),
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta, StoreError>> {
        async move {
            let objects = self.objects.lock().await;
            let metas: Vec<_> = objects
                .range(prefix.to_string()..)
                .take_while(|(name, _)| name.starts_with(prefix))
                .map(|(_, o)| Ok(o.meta.clone()))
                .collect();
            stream::iter(metas)
        }
        .flatten_stream()
        .boxed()
    }

    async fn open(&self, name: &str) -> Result<Option<ObjectReader>, StoreError> {
        let objects = self.objects.lock().await;
        Ok(objects.get(name).map(|o| {
            let reader: ObjectReader = Box::new(io::Cursor::new(o.data.clone()));
            reader
        }))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        if self.faults.lock().await.delete.contains(name) {
            return Err(StoreError::Delete {
                name: name.to_string(),
                source: io::Error::other("injected delete failure"),
            });
        }
        self.objects.lock().await.remove(name);
        Ok(())
    }
}

struct InMemoryWriter {
    name: String,
    buf: Vec<u8>,
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    clock: Arc<dyn Clock>,
    largest_write: Arc<AtomicUsize>,
}

#[async_trait]
impl ArtifactWriter for InMemoryWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        self.largest_write.fetch_max(chunk.len(), Ordering::Relaxed);
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<ObjectMeta, StoreError> {
        let meta = ObjectMeta {
            name: self.name.clone(),
            created_at: self.clock.now(),
            size: self.buf.len() as u64,
        };
        let object = StoredObject {
            meta: meta.clone(),
            data: Bytes::from(self.buf),
        };
        self.objects.lock().await.insert(self.name, object);
        Ok(meta)
    }

    async fn abort(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use futures::TryStreamExt;
    use tokio::io::AsyncReadExt;

    fn store() -> InMemoryArtifactStore {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        InMemoryArtifactStore::new(Arc::new(FixedClock::new(t)))
    }

    #[tokio::test]
    async fn object_is_invisible_until_commit() {
        let store = store();
        let mut writer = store.create("himawari8/a").await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();

        assert!(store.head("himawari8/a").await.unwrap().is_none());
        assert!(store.open("himawari8/a").await.unwrap().is_none());

        let meta = writer.commit().await.unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(store.head("himawari8/a").await.unwrap(), Some(meta));

        let mut out = String::new();
        let mut reader = store.open("himawari8/a").await.unwrap().unwrap();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn aborted_write_leaves_nothing() {
        let store = store();
        let mut writer = store.create("himawari8/a").await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.abort().await;

        assert!(store.names().await.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = store();
        let t = Utc::now();
        store.insert("himawari8/a", t, "1").await;
        store.insert("himawari8/b", t, "2").await;
        store.insert("himawari8-rendered/a.png", t, "3").await;

        let names: Vec<String> = store
            .list("himawari8/")
            .map_ok(|m| m.name)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["himawari8/a", "himawari8/b"]);
    }

    #[tokio::test]
    async fn injected_faults_surface_as_errors() {
        let store = store();
        store.insert("himawari8/a", Utc::now(), "1").await;
        store.fail_delete("himawari8/a").await;
        store.fail_head("backend unavailable").await;

        assert!(matches!(store.head("himawari8/a").await, Err(StoreError::Metadata { .. })));
        assert!(matches!(store.delete("himawari8/a").await, Err(StoreError::Delete { .. })));
    }
}
