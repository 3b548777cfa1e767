//! InMemoryRemoteSource - テスト用のリモートサーバ
//!
//! 公開済みファイル（圧縮済みバイト列）を path ごとに持ち、
//! session の開閉回数と retrieve された path を記録します。

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::RemoteError;
use crate::ports::{RemoteBody, RemoteSession, RemoteSource};

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Default)]
pub struct InMemoryRemoteSource {
    files: Mutex<HashMap<String, Bytes>>,
    retrieved: Arc<Mutex<Vec<String>>>,
    counters: Arc<Counters>,
    refuse_connect: Mutex<Option<RemoteErrorKind>>,
    broken_paths: Arc<Mutex<Vec<String>>>,
}

/// Which connect failure to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Connect,
    Auth,
}

impl InMemoryRemoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `compressed` at `path` (as returned by `ArtifactKey::remote_path`).
    pub fn publish(&self, path: &str, compressed: impl Into<Bytes>) {
        lock(&self.files).insert(path.to_string(), compressed.into());
    }

    /// Every later `connect` fails.
    pub fn refuse_connections(&self, kind: RemoteErrorKind) {
        *lock(&self.refuse_connect) = Some(kind);
    }

    /// Retrieval of `path` fails mid-transfer.
    pub fn break_transfer(&self, path: &str) {
        lock(&self.broken_paths).push(path.to_string());
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn retrieved(&self) -> Vec<String> {
        lock(&self.retrieved).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemoteSource for InMemoryRemoteSource {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        match *lock(&self.refuse_connect) {
            Some(RemoteErrorKind::Connect) => {
                return Err(RemoteError::Connect {
                    host: "memory".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Some(RemoteErrorKind::Auth) => {
                return Err(RemoteError::Auth("530 Login incorrect.".to_string()));
            }
            None => {}
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            files: lock(&self.files).clone(),
            retrieved: self.retrieved.clone(),
            counters: self.counters.clone(),
            broken_paths: self.broken_paths.clone(),
            closed: false,
        }))
    }
}

struct InMemorySession {
    files: HashMap<String, Bytes>,
    retrieved: Arc<Mutex<Vec<String>>>,
    counters: Arc<Counters>,
    broken_paths: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for InMemorySession {
    async fn retrieve(&mut self, path: &str) -> Result<Option<RemoteBody>, RemoteError> {
        lock(&self.retrieved).push(path.to_string());
        let Some(data) = self.files.get(path).cloned() else {
            return Ok(None);
        };
        if lock(&self.broken_paths).iter().any(|p| p == path) {
            // first half arrives, then the connection dies
            let half = data.slice(..data.len() / 2);
            let body: RemoteBody = Box::new(tokio::io::AsyncReadExt::chain(
                io::Cursor::new(half),
                BrokenReader,
            ));
            return Ok(Some(body));
        }
        Ok(Some(Box::new(io::Cursor::new(data))))
    }

    async fn close(mut self: Box<Self>) -> Result<(), RemoteError> {
        self.closed = true;
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if !self.closed {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct BrokenReader;

impl tokio::io::AsyncRead for BrokenReader {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}
