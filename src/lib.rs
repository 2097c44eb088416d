pub mod background;
pub mod config;
pub mod content;
pub mod error;
pub mod fetcher;
pub mod format;
pub mod messenger;
pub mod page_state;
pub mod session;
pub mod summarize;
pub mod text;
pub mod timestamp;
pub mod tracks;

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub use error::{Error, Result, SummarizationError, WARNING_MARKER};
pub use tracks::{CaptionTrack, TrackKind};

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("bare video id pattern"));

// watch?v=, /v/, /e/, /embed/, /shorts/, /live/, youtu.be/ and channel-relative paths.
// The capture must be a whole 11-char id so a failed branch falls through to the next.
static URL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:youtube(?:-nocookie)?\.com/(?:[^/\s]+/.+/|(?:v|e(?:mbed)?|shorts|live)/|.*[?&]v=)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)"#,
    )
    .expect("video url pattern")
});

/// An 11-character YouTube video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Validate an already extracted identifier.
    pub fn parse(id: &str) -> Result<Self> {
        if BARE_ID.is_match(id) {
            Ok(VideoId(id.to_string()))
        } else {
            Err(Error::NotFound(id.to_string()))
        }
    }

    /// Extract the video identifier from a page URL (or accept a bare ID).
    pub fn from_url(input: &str) -> Result<Self> {
        let input = input.trim();

        if BARE_ID.is_match(input) {
            return Ok(VideoId(input.to_string()));
        }

        if let Some(id) = query_video_id(input) {
            return Ok(id);
        }

        URL_ID
            .captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| VideoId(m.as_str().to_string()))
            .ok_or_else(|| Error::NotFound(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The `v` query parameter of an absolute YouTube URL, wherever it sits
/// among the other parameters.
fn query_video_id(input: &str) -> Option<VideoId> {
    let url = reqwest::Url::parse(input).ok()?;
    let host = url.host_str()?;
    let youtube = ["youtube.com", "youtube-nocookie.com"]
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));
    if !youtube {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == "v")
        .filter(|(_, value)| BARE_ID.is_match(value))
        .map(|(_, value)| VideoId(value.into_owned()))
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single captioned line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub offset_seconds: f64,
    pub duration_seconds: f64,
    pub text: String,
}

/// Complete transcript for a video, in playback order
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub video_id: VideoId,
    pub title: String,
    pub language: String,
    pub kind: TrackKind,
    pub entries: Vec<TranscriptEntry>,
}
