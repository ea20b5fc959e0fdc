//! Resumable uploads over the tus 1.0.0 protocol.
//!
//! The server's `Upload-Offset` is the only record of progress: it is queried
//! before every chunk, so a run that dies half way can be continued by calling
//! [`TusUploader::resume`] with the session URL of the earlier run.

pub mod config;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};
use url::Url;

pub use config::UploadConfig;

use crate::error::{Error, Result};

pub const TUS_VERSION: &str = "1.0.0";

const TUS_RESUMABLE: &str = "Tus-Resumable";
const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_METADATA: &str = "Upload-Metadata";
const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Consecutive chunks the server may accept without moving its offset.
const MAX_STALLED_CHUNKS: u32 = 3;

/// `Upload-Metadata` pairs, sent as `key base64(value)` joined by commas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    entries: Vec<(String, String)>,
}

impl UploadMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self::default().with("name", name)
    }

    pub fn for_file(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;
        Ok(Self::named(name))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key} {}", STANDARD.encode(value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_url: Url,
    pub total_size: u64,
    pub chunk_size: u64,
    pub last_known_offset: u64,
}

impl UploadSession {
    pub fn is_complete(&self) -> bool {
        self.last_known_offset == self.total_size
    }
}

pub struct TusUploader {
    client: reqwest::Client,
    config: UploadConfig,
    endpoint: Url,
}

impl TusUploader {
    pub fn new(config: UploadConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| Error::network(endpoint.as_str(), err))?;

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Opens a session for `file_size` bytes and returns its URL.
    pub async fn create(&self, file_size: u64, metadata: &UploadMetadata) -> Result<Url> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(AUTHORIZATION, self.config.authorization())
            .header(UPLOAD_LENGTH, file_size.to_string())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_METADATA, metadata.header_value())
            .send()
            .await
            .map_err(|err| Error::network(self.endpoint.as_str(), err))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            warn!(%status, endpoint = %self.endpoint, "upload session was not created");
            return Err(Error::SessionCreateFailed { status });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(Error::SessionCreateFailed { status })?;

        let session_url = self
            .endpoint
            .join(location)
            .map_err(|err| Error::config(format!("invalid session location `{location}`: {err}")))?;

        info!(session = %session_url, file_size, "created upload session");
        Ok(session_url)
    }

    pub async fn query_offset(&self, session_url: &Url) -> Result<u64> {
        let response = self
            .client
            .head(session_url.clone())
            .header(AUTHORIZATION, self.config.authorization())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(|err| Error::network(session_url.as_str(), err))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(Error::OffsetQueryFailed {
                url: session_url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let offset = response
            .headers()
            .get(UPLOAD_OFFSET)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::OffsetQueryFailed {
                url: session_url.to_string(),
                reason: format!("missing or malformed {UPLOAD_OFFSET} header"),
            })?;

        debug!(session = %session_url, offset, "server reported offset");
        Ok(offset)
    }

    /// Sends up to `chunk_size` bytes of `source` starting at `offset`.
    pub async fn send_chunk(
        &self,
        source: &mut UploadSource,
        session_url: &Url,
        offset: u64,
    ) -> Result<u64> {
        let chunk = source.read_chunk(offset, self.config.chunk_size).await?;

        if chunk.is_empty() {
            return Err(Error::UnexpectedOffset {
                url: session_url.to_string(),
                offset,
                reason: "local file ends before this offset".to_string(),
            });
        }

        let sent = chunk.len() as u64;
        let response = self
            .client
            .patch(session_url.clone())
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(AUTHORIZATION, self.config.authorization())
            .header(UPLOAD_OFFSET, offset.to_string())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .body(chunk)
            .send()
            .await
            .map_err(|err| Error::network(session_url.as_str(), err))?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            warn!(%status, offset, session = %session_url, "chunk rejected");
            return Err(Error::ChunkUploadFailed { status, offset });
        }

        Ok(sent)
    }

    /// Creates a session for `path` and uploads it completely.
    pub async fn upload_file(&self, path: &Path) -> Result<UploadSession> {
        let mut source = UploadSource::open(path).await?;

        let metadata = UploadMetadata::for_file(path)?;
        let session_url = self.create(source.size, &metadata).await?;

        let mut session = self.session(session_url, source.size);
        self.drive(&mut session, &mut source).await?;
        Ok(session)
    }

    /// Continues an upload whose session was created by an earlier run.
    pub async fn resume(&self, path: &Path, session_url: Url) -> Result<UploadSession> {
        let mut source = UploadSource::open(path).await?;

        info!(session = %session_url, "resuming upload");
        let mut session = self.session(session_url, source.size);
        self.drive(&mut session, &mut source).await?;
        Ok(session)
    }

    fn session(&self, session_url: Url, total_size: u64) -> UploadSession {
        UploadSession {
            session_url,
            total_size,
            chunk_size: self.config.chunk_size,
            last_known_offset: 0,
        }
    }

    /// Query, send, repeat until the server reports the whole file.
    async fn drive(&self, session: &mut UploadSession, source: &mut UploadSource) -> Result<()> {
        let mut previous: Option<u64> = None;
        let mut stalled = 0;

        loop {
            let offset = self.query_offset(&session.session_url).await?;
            check_offset(session, previous, offset)?;

            if previous == Some(offset) {
                stalled += 1;
                if stalled >= MAX_STALLED_CHUNKS {
                    return Err(Error::UnexpectedOffset {
                        url: session.session_url.to_string(),
                        offset,
                        reason: format!("offset did not advance after {stalled} chunks"),
                    });
                }
            } else {
                stalled = 0;
            }

            session.last_known_offset = offset;
            if session.is_complete() {
                info!(session = %session.session_url, bytes = session.total_size, "upload complete");
                return Ok(());
            }

            previous = Some(offset);
            let sent = self.send_chunk(source, &session.session_url, offset).await?;
            info!(
                "uploaded {sent} bytes at offset {offset} ({:5.2}%)",
                ((offset + sent) as f64 / session.total_size as f64) * 100.0
            );
        }
    }
}

fn check_offset(session: &UploadSession, previous: Option<u64>, offset: u64) -> Result<()> {
    let reason = match previous {
        _ if offset > session.total_size => {
            format!("beyond the file size of {}", session.total_size)
        }
        Some(previous) if offset < previous => format!("moved backwards from {previous}"),
        _ => return Ok(()),
    };

    Err(Error::UnexpectedOffset {
        url: session.session_url.to_string(),
        offset,
        reason,
    })
}

/// The local file being uploaded.
pub struct UploadSource {
    path: PathBuf,
    file: File,
    size: u64,
}

impl UploadSource {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await.map_err(|err| Error::io(path, err))?;
        let size = file
            .metadata()
            .await
            .map_err(|err| Error::io(path, err))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Up to `chunk_size` bytes starting at `offset`; shorter only at the end
    /// of the file.
    pub async fn read_chunk(&mut self, offset: u64, chunk_size: u64) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| Error::io(&self.path, err))?;

        let mut chunk = Vec::new();
        (&mut self.file)
            .take(chunk_size)
            .read_to_end(&mut chunk)
            .await
            .map_err(|err| Error::io(&self.path, err))?;
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total_size: u64) -> UploadSession {
        UploadSession {
            session_url: Url::parse("http://localhost/files/abc").unwrap(),
            total_size,
            chunk_size: 5,
            last_known_offset: 0,
        }
    }

    #[test]
    fn metadata_is_base64_encoded() {
        let metadata = UploadMetadata::named("clip.mp4").with("type", "video/mp4");
        assert_eq!(
            metadata.header_value(),
            "name Y2xpcC5tcDQ=,type dmlkZW8vbXA0"
        );
    }

    #[test]
    fn metadata_for_file_uses_file_name() {
        let metadata = UploadMetadata::for_file(Path::new("/videos/holiday.mov")).unwrap();
        assert_eq!(metadata, UploadMetadata::named("holiday.mov"));
    }

    #[test]
    fn offsets_must_not_regress_or_overrun() {
        let session = session(10);

        assert!(check_offset(&session, None, 0).is_ok());
        assert!(check_offset(&session, Some(5), 5).is_ok());
        assert!(check_offset(&session, Some(5), 10).is_ok());
        assert!(matches!(
            check_offset(&session, Some(5), 3),
            Err(Error::UnexpectedOffset { offset: 3, .. })
        ));
        assert!(matches!(
            check_offset(&session, None, 11),
            Err(Error::UnexpectedOffset { offset: 11, .. })
        ));
    }

    #[tokio::test]
    async fn last_chunk_is_the_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.bin");
        std::fs::write(&path, b"0123456789ab").unwrap();
        let mut source = UploadSource::open(&path).await.unwrap();

        assert_eq!(source.size(), 12);
        assert_eq!(source.read_chunk(0, 5).await.unwrap(), b"01234");
        assert_eq!(source.read_chunk(10, 5).await.unwrap(), b"ab");
        assert_eq!(source.read_chunk(5, 5).await.unwrap(), b"56789");
        assert!(source.read_chunk(12, 5).await.unwrap().is_empty());
    }

    #[test]
    fn uploader_requires_credentials() {
        let config = UploadConfig::new("", "token");
        assert!(matches!(TusUploader::new(config), Err(Error::Config { .. })));
    }
}
