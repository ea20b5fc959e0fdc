use std::path::PathBuf;

use m3u8_rs::MasterPlaylist;
use tracing::info;

use crate::download::playlist::manifest::{self, ManifestBase, PlaylistVariant};
use crate::download::playlist::segment::{Track, TrackLayout};
use crate::download::playlist::{ManifestResolver, SegmentFetcher};
use crate::download::DownloadClient;
use crate::error::{Error, Result};
use crate::mux::{Concatenator, Muxer};
use crate::options::Options;

/// A master manifest together with the URL parts its renditions hang off.
#[derive(Debug, Clone)]
pub struct Video {
    pub manifest_url: String,
    pub base: ManifestBase,
    pub master: MasterPlaylist,
    pub variants: Vec<PlaylistVariant>,
}

impl Video {
    /// Picks a variant by position (as listed) or by resolution label.
    pub fn select(&self, selection: &str) -> Result<&PlaylistVariant> {
        let selection = selection.trim();

        let by_position = selection
            .parse::<usize>()
            .ok()
            .and_then(|index| self.variants.get(index));

        by_position
            .or_else(|| {
                self.variants
                    .iter()
                    .find(|variant| variant.resolution_label == selection)
            })
            .ok_or_else(|| Error::UnknownVariant {
                selection: selection.to_string(),
            })
    }

    pub fn variant_url(&self, variant: &PlaylistVariant) -> String {
        self.base.variant_url(&variant.relative_uri)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub resolution: String,
    pub video_segments: Vec<PathBuf>,
    pub audio_segments: Vec<PathBuf>,
    /// `None` for a dry run
    pub artifact: Option<PathBuf>,
}

pub struct StreamDownloader<M> {
    resolver: ManifestResolver,
    fetcher: SegmentFetcher,
    concatenator: Concatenator<M>,
    output_root: PathBuf,
}

impl<M: Muxer> StreamDownloader<M> {
    pub fn new(options: &Options, muxer: M) -> Result<Self> {
        let client = DownloadClient::new(options.request_timeout)?;
        let fetcher = SegmentFetcher::new(client.clone(), options.max_parallel_downloads);
        Ok(Self::with_parts(options, client, fetcher, muxer))
    }

    pub fn with_parts(
        options: &Options,
        client: DownloadClient,
        fetcher: SegmentFetcher,
        muxer: M,
    ) -> Self {
        Self {
            resolver: ManifestResolver::new(client),
            fetcher,
            concatenator: Concatenator::new(muxer),
            output_root: options.output_root.clone(),
        }
    }

    pub fn concatenator(&self) -> &Concatenator<M> {
        &self.concatenator
    }

    pub async fn load(&self, manifest_url: &str) -> Result<Video> {
        let base = manifest::resolve_base(manifest_url)?;
        let master = self.resolver.fetch_master(manifest_url).await?;
        let variants = manifest::list_variants(&master);

        info!(asset = %base.asset_id, variants = variants.len(), "resolved video");

        Ok(Video {
            manifest_url: manifest_url.to_string(),
            base,
            master,
            variants,
        })
    }

    /// Local paths the segments of `variant` map to; nothing is written.
    pub async fn segment_paths(&self, video: &Video, variant: &PlaylistVariant) -> Result<Vec<PathBuf>> {
        self.fetch_track(video, &video.variant_url(variant), variant, Track::Video, true)
            .await
    }

    async fn fetch_track(
        &self,
        video: &Video,
        playlist_url: &str,
        variant: &PlaylistVariant,
        track: Track,
        dry_run: bool,
    ) -> Result<Vec<PathBuf>> {
        info!(%track, resolution = %variant.resolution_label, "beginning download");

        let media = self.resolver.fetch_media(playlist_url).await?;
        let segments = manifest::segment_refs(&media);
        let layout = TrackLayout::new(&self.output_root, &variant.resolution_label, track);

        self.fetcher
            .fetch(&video.base.base_url, &segments, &layout, dry_run)
            .await
    }

    /// Downloads the audio rendition (if any) and the video track of
    /// `variant`, merges each, then combines them into `merged.mp4`.
    pub async fn download(
        &self,
        video: &Video,
        variant: &PlaylistVariant,
        dry_run: bool,
    ) -> Result<DownloadReport> {
        let mut report = DownloadReport {
            resolution: variant.resolution_label.clone(),
            ..Default::default()
        };
        let mut artifacts = Vec::new();

        if let Some(audio_uri) = manifest::audio_rendition(&video.master, variant) {
            let audio_url = video.base.variant_url(&audio_uri);
            report.audio_segments = self
                .fetch_track(video, &audio_url, variant, Track::Audio, dry_run)
                .await?;

            if !dry_run {
                let layout = TrackLayout::new(&self.output_root, &variant.resolution_label, Track::Audio);
                artifacts.push(
                    self.concatenator
                        .merge(&report.audio_segments, &layout.artifact_path())
                        .await?,
                );
            }
        }

        report.video_segments = self
            .fetch_track(video, &video.variant_url(variant), variant, Track::Video, dry_run)
            .await?;

        if dry_run {
            return Ok(report);
        }

        let layout = TrackLayout::new(&self.output_root, &variant.resolution_label, Track::Video);
        let video_artifact = self
            .concatenator
            .merge(&report.video_segments, &layout.artifact_path())
            .await?;

        report.artifact = if artifacts.is_empty() {
            Some(video_artifact)
        } else {
            artifacts.insert(0, video_artifact);
            let merged = layout.resolution_dir().join("merged.mp4");
            Some(self.concatenator.combine(&artifacts, &merged).await?)
        };

        if let Some(artifact) = &report.artifact {
            info!(artifact = %artifact.display(), "download complete");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::playlist::manifest::parse_playlist;

    fn video() -> Video {
        let master = match parse_playlist(
            "master",
            b"#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\nstream_720.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=4000000,RESOLUTION=1920x1080\nstream_1080.m3u8\n",
        )
        .unwrap()
        {
            m3u8_rs::Playlist::MasterPlaylist(master) => master,
            m3u8_rs::Playlist::MediaPlaylist(_) => panic!("expected master playlist"),
        };

        Video {
            manifest_url: "https://cdn.example.com/uid/manifest/video.m3u8".to_string(),
            base: manifest::resolve_base("https://cdn.example.com/uid/manifest/video.m3u8").unwrap(),
            variants: manifest::list_variants(&master),
            master,
        }
    }

    #[test]
    fn select_by_position_or_label() {
        let video = video();

        assert_eq!(video.select("0").unwrap().resolution_label, "720p");
        assert_eq!(video.select("1080p").unwrap().resolution_label, "1080p");
        assert!(matches!(
            video.select("2"),
            Err(Error::UnknownVariant { .. })
        ));
        assert!(matches!(
            video.select("480p"),
            Err(Error::UnknownVariant { .. })
        ));
    }

    #[test]
    fn variant_url_uses_manifest_base() {
        let video = video();
        let variant = video.select("720p").unwrap();
        assert_eq!(
            video.variant_url(variant),
            "https://cdn.example.com/uid/manifest/stream_720.m3u8"
        );
    }
}
