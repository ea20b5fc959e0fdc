pub mod playlist;
pub mod video;

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::error::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0";

/// Outcome of [`DownloadClient::download_to_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransfer {
    Written(u64),
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct DownloadClient {
    client: reqwest::Client,
}

impl DownloadClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::network("<client builder>", err))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| Error::network(url, err))?;

        response
            .error_for_status()
            .map_err(|err| Error::network(url, err))
    }

    pub async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self.get(url).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| Error::network(url, err))?;

        trace!(url, len = bytes.len(), "downloaded body");
        Ok(bytes)
    }

    /// Streams `url` into `output`. The body is written to a `.part` sibling and
    /// renamed once complete, so an existing `output` is always a finished file
    /// and is not fetched again.
    pub async fn download_to_file(&self, url: &str, output: &Path) -> Result<FileTransfer> {
        if tokio::fs::try_exists(output)
            .await
            .map_err(|err| Error::io(output, err))?
        {
            debug!(path = %output.display(), "segment already on disk, skipping");
            return Ok(FileTransfer::AlreadyPresent);
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::io(parent, err))?;
        }

        let response = self.get(url).await?;

        let partial = partial_path(output);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|err| Error::io(&partial, err))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| Error::network(url, err))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| Error::io(&partial, err))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|err| Error::io(&partial, err))?;
        drop(file);

        tokio::fs::rename(&partial, output)
            .await
            .map_err(|err| Error::io(output, err))?;

        Ok(FileTransfer::Written(written))
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}
