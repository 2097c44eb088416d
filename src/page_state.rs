use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tracks::{CaptionTrack, TrackKind};

static PLAYER_RESPONSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ytInitialPlayerResponse\s*=\s*(\{.+?\})\s*;\s*(?:var\s+(?:meta|head)|</script|\n)")
        .expect("player response pattern")
});

/// The subset of `ytInitialPlayerResponse` the extractor reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerResponse {
    #[serde(rename = "playabilityStatus")]
    pub playability_status: Option<PlayabilityStatus>,
    pub captions: Option<CaptionsData>,
    #[serde(rename = "videoDetails")]
    pub video_details: Option<VideoDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayabilityStatus {
    pub status: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoDetails {
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    #[serde(rename = "lengthSeconds")]
    pub length_seconds: Option<String>,
    #[serde(rename = "viewCount")]
    pub view_count: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionsData {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    pub player_captions_tracklist_renderer: Option<CaptionTracklistRenderer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionTracklistRenderer {
    #[serde(rename = "captionTracks")]
    pub caption_tracks: Option<Vec<RawCaptionTrack>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCaptionTrack {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "languageCode")]
    pub language_code: String,
    pub kind: Option<String>,
    pub name: Option<TrackName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackName {
    #[serde(rename = "simpleText")]
    pub simple_text: Option<String>,
    pub runs: Option<Vec<TextRun>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextRun {
    pub text: String,
}

impl TrackName {
    fn display(&self) -> Option<String> {
        self.simple_text.clone().or_else(|| {
            self.runs
                .as_ref()
                .map(|runs| runs.iter().map(|r| r.text.as_str()).collect::<String>())
        })
    }
}

impl PlayerResponse {
    pub fn video_id(&self) -> Option<&str> {
        self.video_details.as_ref()?.video_id.as_deref()
    }

    pub fn title(&self) -> String {
        self.video_details
            .as_ref()
            .and_then(|vd| vd.title.clone())
            .unwrap_or_default()
    }

    /// Caption tracks offered by the player, in the order the page lists them.
    pub fn caption_tracks(&self) -> Vec<CaptionTrack> {
        self.captions
            .as_ref()
            .and_then(|c| c.player_captions_tracklist_renderer.as_ref())
            .and_then(|r| r.caption_tracks.as_ref())
            .map(|tracks| {
                tracks
                    .iter()
                    .map(|t| CaptionTrack {
                        language_code: t.language_code.clone(),
                        kind: TrackKind::from_player_kind(t.kind.as_deref()),
                        source_url: t.base_url.clone(),
                        name: t.name.as_ref().and_then(TrackName::display),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The reason the player refuses to play the video, when it does.
    pub fn unplayable_reason(&self) -> Option<String> {
        let status = self.playability_status.as_ref()?;
        match status.status.as_deref() {
            None | Some("OK") => None,
            Some(other) => Some(status.reason.clone().unwrap_or_else(|| other.to_string())),
        }
    }
}

/// Pull the embedded player response out of a watch page.
pub fn extract_player_response(html: &str) -> Result<PlayerResponse> {
    if html.contains(r#"class="g-recaptcha""#) {
        return Err(Error::RateLimited);
    }

    let json = PLAYER_RESPONSE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| Error::Parse("ytInitialPlayerResponse not found in page".to_string()))?
        .as_str();

    debug!("Found embedded player response ({} bytes)", json.len());

    serde_json::from_str(json).map_err(|e| Error::Parse(format!("malformed player response: {e}")))
}

/// Read-only access to player state already present in the page, queried
/// before any network fetch.
pub trait EmbeddedState: Send + Sync {
    fn player_response(&self) -> Option<PlayerResponse>;
}

/// No page loaded; every fetch goes to the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmbeddedState;

impl EmbeddedState for NoEmbeddedState {
    fn player_response(&self) -> Option<PlayerResponse> {
        None
    }
}

/// Player state taken from a watch page that has already been loaded.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    player: PlayerResponse,
}

impl PageSnapshot {
    pub fn new(player: PlayerResponse) -> Self {
        Self { player }
    }

    pub fn from_html(html: &str) -> Result<Self> {
        extract_player_response(html).map(Self::new)
    }
}

impl EmbeddedState for PageSnapshot {
    fn player_response(&self) -> Option<PlayerResponse> {
        Some(self.player.clone())
    }
}

impl<T: EmbeddedState + ?Sized> EmbeddedState for Box<T> {
    fn player_response(&self) -> Option<PlayerResponse> {
        (**self).player_response()
    }
}
