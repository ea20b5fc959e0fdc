use std::path::PathBuf;

use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid manifest URL `{url}`: expected <base>/<asset id>/manifest/<file>.m3u8")]
    InvalidManifestUrl { url: String },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode playlist from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("unrecognized segment name in `{uri}`")]
    UnrecognizedSegmentName { uri: String },

    #[error("download of {url} failed: {source}")]
    DownloadFailed {
        url: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{tool} failed: {reason}")]
    Mux { tool: String, reason: String },

    #[error("expected exactly 2 tracks to combine, got {count}")]
    UnsupportedTrackCount { count: usize },

    #[error("upload session could not be created: HTTP {status}")]
    SessionCreateFailed { status: StatusCode },

    #[error("offset query for {url} failed: {reason}")]
    OffsetQueryFailed { url: String, reason: String },

    #[error("chunk at offset {offset} was rejected: HTTP {status}")]
    ChunkUploadFailed { status: StatusCode, offset: u64 },

    #[error("server reported unexpected upload offset {offset} for {url}: {reason}")]
    UnexpectedOffset {
        url: String,
        offset: u64,
        reason: String,
    },

    #[error("no variant matches `{selection}`")]
    UnknownVariant { selection: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn mux(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mux {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_failure_names_the_url_and_cause() {
        let err = Error::DownloadFailed {
            url: "https://cdn.example.com/seg_7.ts".to_string(),
            source: Box::new(Error::UnrecognizedSegmentName {
                uri: "seg_7.ts".to_string(),
            }),
        };

        let message = err.to_string();
        assert!(message.contains("https://cdn.example.com/seg_7.ts"));
        assert!(message.contains("seg_7.ts"));
    }

    #[test]
    fn io_error_displays_path() {
        let err = Error::io(
            "/tmp/out/720p/video.mp4",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/tmp/out/720p/video.mp4"));
    }
}
