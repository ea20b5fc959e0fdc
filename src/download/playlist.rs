pub mod fetch;
pub mod manifest;
pub mod segment;

pub use fetch::{DownloadOutcome, SegmentFetcher};
pub use manifest::{ManifestBase, ManifestResolver, PlaylistVariant, SegmentRef};
pub use segment::{NamingPolicy, ResolvedSegment, SegmentKind, SegmentNaming, Track, TrackLayout};
