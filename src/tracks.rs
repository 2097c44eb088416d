use std::cmp::Reverse;

use serde::Serialize;

use crate::error::{Error, Result};

/// How a caption track was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Standard,
    /// Automatic speech recognition (`kind: "asr"` in the player response)
    AutoGenerated,
}

impl TrackKind {
    pub fn from_player_kind(kind: Option<&str>) -> Self {
        match kind {
            Some("asr") => TrackKind::AutoGenerated,
            _ => TrackKind::Standard,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Standard => write!(f, "standard"),
            TrackKind::AutoGenerated => write!(f, "auto-generated"),
        }
    }
}

/// A single caption stream offered for a video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    pub language_code: String,
    pub kind: TrackKind,
    pub source_url: String,
    pub name: Option<String>,
}

/// Order tracks by preference: `target_lang` first, then manually authored
/// before auto-generated. Ties keep their original order.
pub fn rank_tracks<'a>(tracks: &'a [CaptionTrack], target_lang: &str) -> Vec<&'a CaptionTrack> {
    let mut ranked: Vec<&CaptionTrack> = tracks.iter().collect();
    // sort_by_key is stable
    ranked.sort_by_key(|t| {
        (
            Reverse(t.language_code == target_lang),
            t.kind == TrackKind::AutoGenerated,
        )
    });
    ranked
}

/// Pick the best track for `target_lang`, or fail with `NoCaptions`.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], target_lang: &str) -> Result<&'a CaptionTrack> {
    rank_tracks(tracks, target_lang)
        .into_iter()
        .next()
        .ok_or(Error::NoCaptions)
}

/// Pick the best track whose language is exactly `lang`.
pub fn select_track_in_language<'a>(tracks: &'a [CaptionTrack], lang: &str) -> Result<&'a CaptionTrack> {
    if tracks.is_empty() {
        return Err(Error::NoCaptions);
    }
    rank_tracks(tracks, lang)
        .into_iter()
        .find(|t| t.language_code == lang)
        .ok_or_else(|| Error::LanguageUnavailable {
            lang: lang.to_string(),
            available: tracks.iter().map(|t| t.language_code.clone()).collect(),
        })
}
