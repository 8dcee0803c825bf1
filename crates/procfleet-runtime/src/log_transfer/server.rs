//! TLS log sink.
//!
//! Accepts authenticated uploads (see [`super::protocol`]) and writes them
//! into a target directory. The listener is bound before the accept loop is
//! spawned, so the reported port is the one actually in use.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::LogTransferError;
use super::protocol::{UploadHeader, UploadReply, read_line, write_line};

/// User and password clients must present.
#[derive(Clone, PartialEq, Eq)]
pub struct TransferCredentials {
    pub user: String,
    pub password: String,
}

impl TransferCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    fn accepts(&self, header: &UploadHeader) -> bool {
        self.user == header.user && self.password == header.password
    }
}

impl fmt::Debug for TransferCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCredentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

struct Sink {
    target_dir: PathBuf,
    credentials: TransferCredentials,
}

/// Running log sink.
pub struct SecureTransferServer {
    addr: SocketAddr,
    target_dir: PathBuf,
    cancel_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl SecureTransferServer {
    /// Bind to `ip` on an OS-chosen port and start accepting uploads into
    /// `target_dir`.
    pub async fn start(
        ip: IpAddr,
        target_dir: impl Into<PathBuf>,
        credentials: TransferCredentials,
        tls: Arc<rustls::ServerConfig>,
    ) -> Result<Self, LogTransferError> {
        let target_dir = target_dir.into();
        tokio::fs::create_dir_all(&target_dir).await?;

        let bind_addr = SocketAddr::new(ip, 0);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| LogTransferError::Bind {
                address: bind_addr.to_string(),
                source,
            })?;
        let addr = listener.local_addr()?;
        info!(%addr, dir = %target_dir.display(), "Log sink listening");

        let cancel_token = CancellationToken::new();
        let sink = Arc::new(Sink {
            target_dir: target_dir.clone(),
            credentials,
        });
        let join_handle = tokio::spawn(accept_loop(
            listener,
            TlsAcceptor::from(tls),
            sink,
            cancel_token.clone(),
        ));

        Ok(Self {
            addr,
            target_dir,
            cancel_token,
            join_handle: Some(join_handle),
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop accepting, abort in-flight uploads and wait for the accept loop.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.join_handle.take() {
            match handle.await {
                Ok(()) => debug!(addr = %self.addr, "Log sink stopped"),
                Err(e) => warn!(addr = %self.addr, error = %e, "Log sink task failed"),
            }
        }
    }
}

impl Drop for SecureTransferServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    sink: Arc<Sink>,
    cancel_token: CancellationToken,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let acceptor = acceptor.clone();
                    let sink = Arc::clone(&sink);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, acceptor, &sink).await {
                            debug!(%peer, error = %e, "Upload connection failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept log upload connection"),
            },
            // Reap finished connections so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
}

async fn handle_connection(stream: TcpStream, acceptor: TlsAcceptor, sink: &Sink) -> io::Result<()> {
    let tls = acceptor.accept(stream).await?;
    let mut stream = BufReader::new(tls);

    let header: UploadHeader = read_line(&mut stream).await?;
    let Some(file_name) = check_header(&header, sink) else {
        warn!(user = %header.user, file = %header.file_name, "Rejected log upload");
        write_line(stream.get_mut(), &UploadReply::rejected("upload refused")).await?;
        return stream.get_mut().shutdown().await;
    };
    write_line(stream.get_mut(), &UploadReply::accepted()).await?;

    let path = sink.target_dir.join(&file_name);
    let reply = match receive(&mut stream, &path, header.size).await {
        Ok(()) => {
            info!(file = %path.display(), bytes = header.size, "Received log file");
            UploadReply::accepted()
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Failed to receive log file");
            let _ = tokio::fs::remove_file(&path).await;
            UploadReply::rejected(e.to_string())
        }
    };
    write_line(stream.get_mut(), &reply).await?;
    stream.get_mut().shutdown().await
}

/// Authenticate and pick the destination file name.
fn check_header(header: &UploadHeader, sink: &Sink) -> Option<String> {
    if !sink.credentials.accepts(header) {
        return None;
    }
    header.sanitized_file_name()
}

async fn receive<R>(stream: &mut R, path: &Path, size: u64) -> io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut file = File::create(path).await?;
    let copied = tokio::io::copy(&mut stream.take(size), &mut file).await?;
    if copied != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {size} bytes, got {copied}"),
        ));
    }
    file.sync_all().await
}
