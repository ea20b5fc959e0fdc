use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static SEGMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<init>init)|seg_\d+)\.(?:ts|mp4)$").expect("segment name pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Media,
    Initialization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Video => "video",
            Track::Audio => "audio",
        }
    }

    /// File name of the merged intermediate for this track.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Track::Video => "video.mp4",
            Track::Audio => "audio.mp4",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the segments of one track of one resolution are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLayout {
    pub root: PathBuf,
    pub resolution: String,
    pub track: Track,
}

impl TrackLayout {
    pub fn new(root: impl Into<PathBuf>, resolution: impl Into<String>, track: Track) -> Self {
        Self {
            root: root.into(),
            resolution: resolution.into(),
            track,
        }
    }

    pub fn resolution_dir(&self) -> PathBuf {
        self.root.join(&self.resolution)
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.resolution_dir().join("segments")
    }

    pub fn segment_path(&self, local_name: &str) -> PathBuf {
        self.segments_dir()
            .join(format!("{}_{}", self.track.as_str(), local_name))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.resolution_dir().join(self.track.artifact_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    pub sequence_index: usize,
    pub absolute_url: String,
    pub local_path: PathBuf,
    pub kind: SegmentKind,
}

/// Maps an advertised segment URI to a local file name.
///
/// Implementations must be deterministic: the same URI always yields the same
/// name, which is what lets an interrupted download skip finished segments.
pub trait NamingPolicy: Send + Sync {
    fn classify(&self, uri: &str) -> Result<(String, SegmentKind)>;
}

/// `init.<ext>` and `seg_<digits>.<ext>` with `ext` in `ts`/`mp4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentNaming;

impl NamingPolicy for SegmentNaming {
    fn classify(&self, uri: &str) -> Result<(String, SegmentKind)> {
        let path = strip_parent_prefixes(uri);
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default();

        match SEGMENT_NAME.captures(name) {
            Some(captures) => {
                let kind = if captures.name("init").is_some() {
                    SegmentKind::Initialization
                } else {
                    SegmentKind::Media
                };
                Ok((name.to_string(), kind))
            }
            None => Err(Error::UnrecognizedSegmentName {
                uri: uri.to_string(),
            }),
        }
    }
}

/// Removes every leading `../`.
pub fn strip_parent_prefixes(uri: &str) -> &str {
    let mut uri = uri;
    while let Some(rest) = uri.strip_prefix("../") {
        uri = rest;
    }
    uri
}

/// Absolute URL of a segment: absolute URIs are kept, anything else is
/// appended to `base_url` once its `../` prefixes are gone.
pub fn segment_url(base_url: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }

    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        strip_parent_prefixes(uri)
    )
}
