use std::collections::HashSet;
use std::sync::LazyLock;

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist};
use regex::Regex;
use tracing::{debug, info};

use crate::download::DownloadClient;
use crate::error::{Error, Result};

static MANIFEST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.+)/(?P<asset>[A-Za-z0-9_-]+)/manifest/[^/?#]+\.m3u8$")
        .expect("manifest URL pattern is valid")
});

/// The parts of a manifest URL every rendition URL is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestBase {
    pub base_url: String,
    pub asset_id: String,
}

impl ManifestBase {
    /// `<base>/<asset id>/manifest/<uri>`, not further validated.
    pub fn variant_url(&self, uri: &str) -> String {
        format!("{}/{}/manifest/{}", self.base_url, self.asset_id, uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistVariant {
    pub resolution_label: String,
    pub relative_uri: String,
    pub bandwidth: u64,
    pub audio_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub sequence_index: usize,
    pub raw_uri: String,
}

pub fn resolve_base(manifest_url: &str) -> Result<ManifestBase> {
    let captures = MANIFEST_URL
        .captures(manifest_url)
        .ok_or_else(|| Error::InvalidManifestUrl {
            url: manifest_url.to_string(),
        })?;

    Ok(ManifestBase {
        base_url: captures["base"].to_string(),
        asset_id: captures["asset"].to_string(),
    })
}

/// Variants in declaration order, I-frame streams excluded. Labels are unique:
/// a later variant with an already seen label is dropped.
pub fn list_variants(master: &MasterPlaylist) -> Vec<PlaylistVariant> {
    let mut seen = HashSet::new();

    master
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .filter_map(|variant| {
            let label = match &variant.resolution {
                Some(resolution) => format!("{}p", resolution.height),
                None => format!("{}bps", variant.bandwidth),
            };

            if !seen.insert(label.clone()) {
                debug!(%label, uri = %variant.uri, "duplicate resolution label, ignoring variant");
                return None;
            }

            Some(PlaylistVariant {
                resolution_label: label,
                relative_uri: variant.uri.clone(),
                bandwidth: variant.bandwidth,
                audio_group: variant.audio.clone(),
            })
        })
        .collect()
}

/// URI of the audio rendition that goes with `variant`.
pub fn audio_rendition(master: &MasterPlaylist, variant: &PlaylistVariant) -> Option<String> {
    let mut audio = master
        .alternatives
        .iter()
        .filter(|media| media.media_type == AlternativeMediaType::Audio && media.uri.is_some());

    let chosen = match &variant.audio_group {
        Some(group) => audio.find(|media| &media.group_id == group),
        None => audio.next(),
    };

    chosen.and_then(|media| media.uri.clone())
}

/// Segment references in playback order. An `EXT-X-MAP` initialization
/// segment is emitted once, ahead of the first segment it applies to.
pub fn segment_refs(media: &MediaPlaylist) -> Vec<SegmentRef> {
    let mut uris = Vec::with_capacity(media.segments.len() + 1);
    let mut current_map: Option<&str> = None;

    for segment in &media.segments {
        if let Some(map) = &segment.map {
            if current_map != Some(map.uri.as_str()) {
                current_map = Some(map.uri.as_str());
                uris.push(map.uri.clone());
            }
        }
        uris.push(segment.uri.clone());
    }

    uris.into_iter()
        .enumerate()
        .map(|(sequence_index, raw_uri)| SegmentRef {
            sequence_index,
            raw_uri,
        })
        .collect()
}

pub fn parse_playlist(url: &str, body: &[u8]) -> Result<Playlist> {
    m3u8_rs::parse_playlist_res(body).map_err(|err| Error::decode(url, err.to_string()))
}

#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: DownloadClient,
}

impl ManifestResolver {
    pub fn new(client: DownloadClient) -> Self {
        Self { client }
    }

    pub async fn fetch_playlist(&self, url: &str) -> Result<Playlist> {
        debug!(url, "fetching playlist");
        let body = self.client.download(url).await?;
        parse_playlist(url, &body)
    }

    pub async fn fetch_master(&self, url: &str) -> Result<MasterPlaylist> {
        match self.fetch_playlist(url).await? {
            Playlist::MasterPlaylist(master) => {
                info!(url, variants = master.variants.len(), "loaded master playlist");
                Ok(master)
            }
            Playlist::MediaPlaylist(_) => Err(Error::decode(
                url,
                "expected a master playlist, found a media playlist",
            )),
        }
    }

    pub async fn fetch_media(&self, url: &str) -> Result<MediaPlaylist> {
        match self.fetch_playlist(url).await? {
            Playlist::MediaPlaylist(media) => {
                debug!(url, segments = media.segments.len(), "loaded media playlist");
                Ok(media)
            }
            Playlist::MasterPlaylist(_) => Err(Error::decode(
                url,
                "expected a media playlist, found a master playlist",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"group_audio\",NAME=\"original\",DEFAULT=YES,AUTOSELECT=YES,URI=\"stream_audio.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720,AUDIO=\"group_audio\"
stream_720.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=4000000,RESOLUTION=1920x1080,AUDIO=\"group_audio\"
stream_1080.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1600000,RESOLUTION=1280x720,AUDIO=\"group_audio\"
stream_720_alt.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:4
#EXT-X-MAP:URI=\"../../video/720/init.mp4\"
#EXTINF:4.000,
../../video/720/seg_1.mp4
#EXTINF:4.000,
../../video/720/seg_2.mp4
#EXTINF:2.000,
../../video/720/seg_3.mp4
#EXT-X-ENDLIST
";

    fn master() -> MasterPlaylist {
        match parse_playlist("master", MASTER.as_bytes()).unwrap() {
            Playlist::MasterPlaylist(master) => master,
            Playlist::MediaPlaylist(_) => panic!("expected master playlist"),
        }
    }

    #[test]
    fn resolve_base_round_trips() {
        let url = "https://customer-abc.cloudflarestream.com/ea95132c15732412d22c1476fa83f27a/manifest/video.m3u8";
        let base = resolve_base(url).unwrap();

        assert_eq!(base.base_url, "https://customer-abc.cloudflarestream.com");
        assert_eq!(base.asset_id, "ea95132c15732412d22c1476fa83f27a");
        assert_eq!(base.variant_url("video.m3u8"), url);
    }

    #[test]
    fn resolve_base_rejects_other_shapes() {
        for url in [
            "https://example.com/video.m3u8",
            "https://example.com/uid/manifest/",
            "https://example.com/uid/playlist/video.m3u8",
            "https://example.com/u.i.d/manifest/video.m3u8",
        ] {
            assert!(
                matches!(resolve_base(url), Err(Error::InvalidManifestUrl { .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn variants_keep_declaration_order_and_unique_labels() {
        let variants = list_variants(&master());

        let labels: Vec<_> = variants.iter().map(|v| v.resolution_label.as_str()).collect();
        assert_eq!(labels, ["720p", "1080p"]);
        assert_eq!(variants[0].relative_uri, "stream_720.m3u8");
        assert_eq!(variants[1].bandwidth, 4_000_000);
    }

    #[test]
    fn audio_rendition_follows_group() {
        let master = master();
        let variants = list_variants(&master);

        assert_eq!(
            audio_rendition(&master, &variants[0]).as_deref(),
            Some("stream_audio.m3u8")
        );

        let orphan = PlaylistVariant {
            audio_group: Some("missing".to_string()),
            ..variants[0].clone()
        };
        assert_eq!(audio_rendition(&master, &orphan), None);
    }

    #[test]
    fn segment_refs_put_init_first() {
        let media = match parse_playlist("media", MEDIA.as_bytes()).unwrap() {
            Playlist::MediaPlaylist(media) => media,
            Playlist::MasterPlaylist(_) => panic!("expected media playlist"),
        };

        let refs = segment_refs(&media);
        let uris: Vec<_> = refs.iter().map(|r| r.raw_uri.as_str()).collect();
        assert_eq!(
            uris,
            [
                "../../video/720/init.mp4",
                "../../video/720/seg_1.mp4",
                "../../video/720/seg_2.mp4",
                "../../video/720/seg_3.mp4",
            ]
        );
        assert!(refs.iter().enumerate().all(|(i, r)| r.sequence_index == i));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            parse_playlist("https://example.com/x.m3u8", b"<html></html>"),
            Err(Error::Decode { .. })
        ));
    }
}
