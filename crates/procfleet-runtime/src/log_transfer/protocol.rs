//! Wire format of the log sink.
//!
//! One upload per TLS connection, in newline-terminated JSON lines:
//!
//! 1. client: [`UploadHeader`]
//! 2. server: [`UploadReply`], accepting or rejecting the upload
//! 3. client: exactly `size` bytes of file content
//! 4. server: [`UploadReply`] once the file is stored

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a header or reply line.
pub const MAX_LINE_LEN: usize = 16 * 1024;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHeader {
    pub user: String,
    pub password: String,
    pub file_name: String,
    pub size: u64,
}

impl UploadHeader {
    /// Final path component of `file_name`, if it is a usable file name.
    ///
    /// Directory parts are stripped so that a client can only write into
    /// the sink's target directory itself.
    pub fn sanitized_file_name(&self) -> Option<String> {
        let name = Path::new(&self.file_name).file_name()?.to_str()?;
        if name.is_empty() || name == "." || name == ".." {
            None
        } else {
            Some(name.to_owned())
        }
    }
}

impl fmt::Debug for UploadHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHeader")
            .field("user", &self.user)
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UploadReply {
    pub const fn accepted() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Write `value` as one JSON line.
pub async fn write_line<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Read one JSON line, refusing lines longer than [`MAX_LINE_LEN`].
pub async fn read_line<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of line",
            ));
        }
        let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let consumed = chunk.len();
        line.extend_from_slice(chunk);
        reader.consume(consumed);

        if line.len() > MAX_LINE_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        if done {
            break;
        }
    }
    serde_json::from_slice(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn header(file_name: &str) -> UploadHeader {
        UploadHeader {
            user: "u".into(),
            password: "p".into(),
            file_name: file_name.into(),
            size: 0,
        }
    }

    #[test]
    fn file_names_are_reduced_to_their_last_component() {
        assert_eq!(header("logs/a.log").sanitized_file_name().as_deref(), Some("a.log"));
        assert_eq!(
            header("../../etc/passwd").sanitized_file_name().as_deref(),
            Some("passwd")
        );
        assert_eq!(header("..").sanitized_file_name(), None);
        assert_eq!(header("").sanitized_file_name(), None);
        assert_eq!(header("/").sanitized_file_name(), None);
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", header("a.log"));
        assert!(!rendered.contains("password"));
    }

    #[tokio::test]
    async fn lines_are_read_one_at_a_time() {
        let mut wire = Vec::new();
        write_line(&mut wire, &UploadReply::accepted()).await.unwrap();
        write_line(&mut wire, &UploadReply::rejected("no")).await.unwrap();
        wire.extend_from_slice(b"payload");

        let mut reader = BufReader::new(wire.as_slice());
        let first: UploadReply = read_line(&mut reader).await.unwrap();
        let second: UploadReply = read_line(&mut reader).await.unwrap();
        assert!(first.ok);
        assert_eq!(second.message.as_deref(), Some("no"));

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn oversized_lines_are_rejected() {
        let wire = vec![b'x'; MAX_LINE_LEN + 10];
        let mut reader = BufReader::new(wire.as_slice());
        let err = read_line::<_, UploadReply>(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
