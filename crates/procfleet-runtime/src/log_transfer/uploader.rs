//! Client side of the log sink.
//!
//! [`LogUploader`] implements [`LogUploadClient`] for a process server
//! running on this host: every request becomes a background upload task,
//! and the bookkeeping is polled through `log_upload_state`.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use std::io;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use procfleet_core::{
    LogUploadClient, LogUploadRequest, LogUploadResult, LogUploadState, UploadError,
};

use super::certificate::parse_pem_certificate;
use super::protocol::{UploadHeader, UploadReply, read_line, write_line};

const CHUNK_SIZE: u32 = 8 * 1024;

#[derive(Debug, Default)]
struct UploadBook {
    pending: usize,
    results: Vec<LogUploadResult>,
}

fn lock(book: &Mutex<UploadBook>) -> MutexGuard<'_, UploadBook> {
    book.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Uploads local files to a log sink.
#[derive(Debug, Default)]
pub struct LogUploader {
    book: Arc<Mutex<UploadBook>>,
}

impl LogUploader {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_config(certificate: &str) -> Result<Arc<rustls::ClientConfig>, UploadError> {
        let ca = parse_pem_certificate(certificate)
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        let mut roots = RootCertStore::empty();
        roots
            .add(ca)
            .map_err(|e| UploadError::InvalidRequest(format!("unusable certificate: {e}")))?;

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| UploadError::Unavailable(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

#[async_trait]
impl LogUploadClient for LogUploader {
    async fn log_upload_file(&self, request: LogUploadRequest) -> Result<(), UploadError> {
        if request.path.file_name().is_none() {
            return Err(UploadError::InvalidRequest(format!(
                "{} does not name a file",
                request.path.display()
            )));
        }
        if request.max_upload_rate == Some(0) {
            return Err(UploadError::InvalidRequest("upload rate must be positive".into()));
        }
        let tls = Self::client_config(&request.certificate)?;

        lock(&self.book).pending += 1;
        let book = Arc::clone(&self.book);
        tokio::spawn(async move {
            let result = match upload(&request, tls).await {
                Ok(bytes) => {
                    debug!(file = %request.path.display(), bytes, "Log file uploaded");
                    LogUploadResult::succeeded(&request.path, bytes)
                }
                Err(e) => {
                    warn!(file = %request.path.display(), error = %e, "Log upload failed");
                    LogUploadResult::failed(&request.path, e.to_string())
                }
            };
            let mut book = lock(&book);
            book.pending -= 1;
            book.results.push(result);
        });
        Ok(())
    }

    async fn log_upload_state(&self) -> Result<LogUploadState, UploadError> {
        let mut book = lock(&self.book);
        Ok(LogUploadState {
            pending_count: book.pending,
            results: std::mem::take(&mut book.results),
        })
    }
}

async fn upload(request: &LogUploadRequest, tls: Arc<rustls::ClientConfig>) -> io::Result<u64> {
    let mut file = File::open(&request.path).await?;
    let size = file.metadata().await?.len();
    let file_name = request
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tcp = TcpStream::connect((request.ip, request.port)).await?;
    let tls = TlsConnector::from(tls)
        .connect(ServerName::from(request.ip), tcp)
        .await?;
    let mut stream = BufReader::new(tls);

    let header = UploadHeader {
        user: request.user.clone(),
        password: request.password.clone(),
        file_name,
        size,
    };
    write_line(stream.get_mut(), &header).await?;
    expect_accepted(read_line(&mut stream).await?)?;

    let throttle = request.max_upload_rate.map(Throttle::new);
    send_body(stream.get_mut(), &mut file, size, throttle.as_ref()).await?;
    expect_accepted(read_line(&mut stream).await?)?;

    Ok(size)
}

fn expect_accepted(reply: UploadReply) -> io::Result<()> {
    if reply.ok {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            reply.message.unwrap_or_else(|| "rejected by log sink".into()),
        ))
    }
}

/// Token bucket over bytes, refilled at the requested rate.
struct Throttle {
    limiter: DefaultDirectRateLimiter,
    chunk: NonZeroU32,
}

impl Throttle {
    fn new(bytes_per_second: u64) -> Self {
        let rate = NonZeroU32::new(u32::try_from(bytes_per_second).unwrap_or(u32::MAX))
            .unwrap_or(NonZeroU32::MIN);
        let chunk = NonZeroU32::new(CHUNK_SIZE).map_or(rate, |max| rate.min(max));
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(chunk)),
            chunk,
        }
    }

    const fn chunk_len(&self) -> usize {
        self.chunk.get() as usize
    }

    async fn admit(&self, bytes: usize) -> io::Result<()> {
        let Some(cells) = NonZeroU32::new(u32::try_from(bytes).unwrap_or(u32::MAX)) else {
            return Ok(());
        };
        self.limiter
            .until_n_ready(cells)
            .await
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

async fn send_body<W, R>(
    writer: &mut W,
    reader: &mut R,
    size: u64,
    throttle: Option<&Throttle>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let chunk_len = throttle.map_or(CHUNK_SIZE as usize, Throttle::chunk_len);
    let mut buf = vec![0u8; chunk_len];
    let mut remaining = size;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(chunk_len, |r| r.min(chunk_len));
        let read = reader.read(&mut buf[..want]).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank during upload",
            ));
        }
        if let Some(throttle) = throttle {
            throttle.admit(read).await?;
        }
        writer.write_all(&buf[..read]).await?;
        remaining -= read as u64;
    }
    writer.flush().await
}
