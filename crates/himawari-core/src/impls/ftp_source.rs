//! FtpRemoteSource - JAXA P-Tree の FTP サーバ
//!
//! suppaftp の同期 API を `spawn_blocking` 上で動かし、受信したバイト列を
//! 容量 1 の channel 経由で async 側の `AsyncRead` に渡します。
//!
//! # 実装詳細
//! - 550（ファイルが無い）は `Ok(None)`。それ以外の応答エラーは `RemoteError::Transfer`
//! - 転送中のデータは常に [`CHUNK_SIZE`] 単位でしか存在しない
//! - body を読み切る（または drop する）まで次の `retrieve` は前の転送の完了を待つ
//! - `close` されずに drop された session も QUIT を送ってから接続を閉じる

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::ExposeSecret;
use futures::StreamExt;
use futures::stream;
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;

use crate::config::RemoteConfig;
use crate::domain::RemoteError;
use crate::ports::{RemoteBody, RemoteSession, RemoteSource};

/// Size of one transfer chunk.
pub const CHUNK_SIZE: usize = 4 * 1024;

type Transfer = JoinHandle<(FtpStream, Result<(), FtpError>)>;

pub struct FtpRemoteSource {
    config: RemoteConfig,
}

impl FtpRemoteSource {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

fn resolve(host: &str) -> io::Result<SocketAddr> {
    host.to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no address"))
}

#[async_trait]
impl RemoteSource for FtpRemoteSource {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let config = self.config.clone();
        let host = config.host.clone();
        let connect_err = |message: String| RemoteError::Connect {
            host: host.clone(),
            message,
        };

        let ftp = tokio::task::spawn_blocking(move || -> Result<Result<FtpStream, RemoteError>, String> {
            let addr = resolve(&config.host).map_err(|e| e.to_string())?;
            let mut ftp = FtpStream::connect_timeout(addr, config.connect_timeout)
                .map_err(|e| e.to_string())?;
            if let Err(e) = ftp.login(config.username.as_str(), config.password.expose_secret()) {
                let _ = ftp.quit();
                return Ok(Err(RemoteError::Auth(e.to_string())));
            }
            ftp.transfer_type(FileType::Binary)
                .map_err(|e| e.to_string())?;
            Ok(Ok(ftp))
        })
        .await
        .map_err(|e| connect_err(e.to_string()))?
        .map_err(connect_err)??;

        tracing::debug!(host = %self.config.host, "ftp session opened");

        Ok(Box::new(FtpSession {
            ftp: Some(ftp),
            transfer: None,
            root: self.config.root.trim_end_matches('/').to_string(),
        }))
    }
}

struct FtpSession {
    /// `None` while a transfer owns the control connection.
    ftp: Option<FtpStream>,
    transfer: Option<Transfer>,
    root: String,
}

impl FtpSession {
    /// Waits for the previous transfer to finish and takes the connection back.
    async fn reclaim(&mut self) -> Result<(), RemoteError> {
        let Some(handle) = self.transfer.take() else {
            return Ok(());
        };
        let (ftp, result) = handle.await.map_err(|e| RemoteError::Transfer {
            path: self.root.clone(),
            message: e.to_string(),
        })?;
        match result {
            Ok(()) => {
                self.ftp = Some(ftp);
                Ok(())
            }
            // the control connection may be out of sync; drop it
            Err(e) => Err(RemoteError::Transfer {
                path: self.root.clone(),
                message: format!("previous transfer did not complete: {e}"),
            }),
        }
    }
}

fn is_not_found(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(resp) if resp.status == Status::FileUnavailable)
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn retrieve(&mut self, path: &str) -> Result<Option<RemoteBody>, RemoteError> {
        self.reclaim().await?;
        let full_path = format!("{}{}", self.root, path);
        let mut ftp = self.ftp.take().ok_or_else(|| RemoteError::Transfer {
            path: full_path.clone(),
            message: "session is no longer usable".to_string(),
        })?;

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (chunk_tx, chunk_rx) = mpsc::channel::<io::Result<Bytes>>(1);

        let remote = full_path.clone();
        let handle: Transfer = tokio::task::spawn_blocking(move || {
            let mut started = Some(started_tx);
            let result = ftp.retr(&remote, |reader: &mut dyn Read| {
                if let Some(tx) = started.take() {
                    let _ = tx.send(());
                }
                let mut buf = [0u8; CHUNK_SIZE];
                loop {
                    let n = reader.read(&mut buf).map_err(FtpError::ConnectionError)?;
                    if n == 0 {
                        return Ok(());
                    }
                    if chunk_tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        return Err(FtpError::ConnectionError(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "reader went away",
                        )));
                    }
                }
            });
            // a failure after data started flowing reaches the reader as its last item
            if let Err(e) = &result {
                if started.is_none() {
                    let _ = chunk_tx.blocking_send(Err(io::Error::other(e.to_string())));
                }
            }
            (ftp, result)
        });

        if started_rx.await.is_ok() {
            self.transfer = Some(handle);
            let chunks = stream::unfold(chunk_rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })
            .boxed();
            return Ok(Some(Box::new(StreamReader::new(chunks))));
        }

        // retr failed before any data arrived
        let (ftp, result) = handle.await.map_err(|e| RemoteError::Transfer {
            path: full_path.clone(),
            message: e.to_string(),
        })?;
        self.ftp = Some(ftp);
        match result {
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RemoteError::Transfer {
                path: full_path,
                message: e.to_string(),
            }),
            Ok(()) => Err(RemoteError::Transfer {
                path: full_path,
                message: "transfer finished without data".to_string(),
            }),
        }
    }

    async fn close(mut self: Box<Self>) -> Result<(), RemoteError> {
        let reclaimed = self.reclaim().await;
        let Some(mut ftp) = self.ftp.take() else {
            return reclaimed;
        };
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || ftp.quit())
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()))
            .map_err(|message| RemoteError::Transfer {
                path: root,
                message: format!("quit failed: {message}"),
            })?;
        tracing::debug!("ftp session closed");
        reclaimed
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        // a pending transfer ends on its own once the body is dropped
        if let Some(mut ftp) = self.ftp.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let _ = handle.spawn_blocking(move || ftp.quit());
            }
        }
    }
}
