//! Download HLS renditions segment by segment and upload files over tus.

pub mod download;
pub mod error;
pub mod file;
pub mod mux;
pub mod options;
pub mod upload;

pub use download::playlist::{
    DownloadOutcome, ManifestBase, ManifestResolver, NamingPolicy, PlaylistVariant,
    ResolvedSegment, SegmentFetcher, SegmentKind, SegmentNaming, SegmentRef, Track, TrackLayout,
};
pub use download::video::{DownloadReport, StreamDownloader, Video};
pub use download::DownloadClient;
pub use error::{Error, Result};
pub use mux::{Concatenator, FfmpegMuxer, Muxer};
pub use options::Options;
pub use upload::{TusUploader, UploadConfig, UploadMetadata, UploadSession, UploadSource};
