use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::page_state::{EmbeddedState, PlayerResponse, extract_player_response};
use crate::text::normalize_text;
use crate::tracks::{CaptionTrack, select_track, select_track_in_language};
use crate::{Transcript, TranscriptEntry, VideoId};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub const DEFAULT_WATCH_BASE: &str = "https://www.youtube.com/watch?v=";

/// Where the fetcher gets page and caption bodies from
#[async_trait]
pub trait HttpSource: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;
}

/// `HttpSource` backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestSource {
    client: reqwest::Client,
}

impl ReqwestSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpSource for ReqwestSource {
    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Language ranked first when no preference is given
    pub target_lang: String,
    /// Prefix the video id is appended to for the watch page
    pub watch_base: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            target_lang: "en".to_string(),
            watch_base: DEFAULT_WATCH_BASE.to_string(),
        }
    }
}

/// Turns a video id into a normalized transcript.
pub struct TranscriptFetcher<H, S> {
    http: H,
    state: S,
    config: FetcherConfig,
}

impl<H: HttpSource, S: EmbeddedState> TranscriptFetcher<H, S> {
    pub fn new(http: H, state: S, config: FetcherConfig) -> Self {
        Self { http, state, config }
    }

    /// Fetch the transcript of the best-ranked caption track.
    pub async fn fetch(&self, video_id: &VideoId, cancel: &CancellationToken) -> Result<Transcript> {
        self.attempt(video_id, None, cancel).await
    }

    /// Fetch in `lang` if the video has it, otherwise fall back to the
    /// best-ranked track. Two attempts at most.
    pub async fn fetch_preferring(
        &self,
        video_id: &VideoId,
        lang: &str,
        cancel: &CancellationToken,
    ) -> Result<Transcript> {
        match self.attempt(video_id, Some(lang), cancel).await {
            Ok(transcript) => Ok(transcript),
            Err(e @ (Error::LanguageUnavailable { .. } | Error::EmptyTranscript)) => {
                info!("No usable '{lang}' transcript for {video_id} ({e}), trying any language");
                self.attempt(video_id, None, cancel).await
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(&self, video_id: &VideoId, lang: Option<&str>, cancel: &CancellationToken) -> Result<Transcript> {
        let player = self.player_response(video_id, cancel).await?;

        let tracks = player.caption_tracks();
        if tracks.is_empty() {
            if let Some(reason) = player.unplayable_reason() {
                return Err(Error::Unplayable(reason));
            }
            return Err(Error::NoCaptions);
        }

        let track = match lang {
            Some(lang) => select_track_in_language(&tracks, lang)?,
            None => select_track(&tracks, &self.config.target_lang)?,
        };
        debug!("Using caption track: lang={} kind={}", track.language_code, track.kind);

        let body = self.get(&timed_text_url(track), cancel).await?;
        let entries = parse_timed_text(&body)?;
        if entries.is_empty() {
            return Err(Error::EmptyTranscript);
        }

        Ok(Transcript {
            video_id: video_id.clone(),
            title: player.title(),
            language: track.language_code.clone(),
            kind: track.kind,
            entries,
        })
    }

    async fn player_response(&self, video_id: &VideoId, cancel: &CancellationToken) -> Result<PlayerResponse> {
        if let Some(player) = self.state.player_response() {
            if player.video_id() == Some(video_id.as_str()) {
                debug!("Reusing embedded player response for {video_id}");
                return Ok(player);
            }
            debug!(
                "Embedded player response is for {:?}, fetching {video_id}",
                player.video_id()
            );
        }

        let watch_url = format!("{}{video_id}", self.config.watch_base);
        debug!("Fetching watch page: {watch_url}");
        let html = self.get(&watch_url, cancel).await?;
        extract_player_response(&html)
    }

    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Fetch of {url} cancelled");
                Err(Error::Cancelled)
            }
            body = self.http.get_text(url) => body,
        }
    }
}

fn timed_text_url(track: &CaptionTrack) -> String {
    let sep = if track.source_url.contains('?') { '&' } else { '?' };
    format!("{}{sep}fmt=json3", track.source_url)
}

#[derive(Debug, Deserialize)]
struct TimedTextDocument {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(rename = "tStartMs", default)]
    t_start_ms: f64,
    #[serde(rename = "dDurationMs", default)]
    d_duration_ms: f64,
    segs: Option<Vec<TimedTextSegment>>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSegment {
    #[serde(default)]
    utf8: String,
}

/// Parse a caption payload: `json3` events, or the legacy XML body some
/// tracks still serve.
fn parse_timed_text(body: &str) -> Result<Vec<TranscriptEntry>> {
    if body.trim_start().starts_with('<') {
        return parse_caption_xml(body);
    }

    let doc: TimedTextDocument =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("malformed timed-text document: {e}")))?;

    Ok(doc
        .events
        .into_iter()
        .filter_map(|event| {
            let segs = event.segs.filter(|s| !s.is_empty())?;
            let joined = segs.iter().map(|s| s.utf8.as_str()).collect::<Vec<_>>().join(" ");
            entry(event.t_start_ms / 1000.0, event.d_duration_ms / 1000.0, &joined)
        })
        .collect())
}

fn entry(offset_seconds: f64, duration_seconds: f64, raw: &str) -> Option<TranscriptEntry> {
    let text = normalize_text(raw.trim());
    if text.is_empty() {
        return None;
    }
    Some(TranscriptEntry {
        offset_seconds,
        duration_seconds,
        text,
    })
}

fn parse_caption_xml(xml: &str) -> Result<Vec<TranscriptEntry>> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<(f64, f64, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"text" => {
                let mut start = 0.0;
                let mut dur = 0.0;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value);
                    match attr.key.as_ref() {
                        b"start" => start = value.parse::<f64>().unwrap_or(0.0),
                        b"dur" => dur = value.parse::<f64>().unwrap_or(0.0),
                        _ => {}
                    }
                }
                current = Some((start, dur, String::new()));
            }
            Ok(Event::Text(ref e)) => {
                if let Some((_, _, text)) = current.as_mut() {
                    // Entities are left in place; normalize_text decodes them.
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"text" => {
                if let Some((start, dur, text)) = current.take() {
                    entries.extend(entry(start, dur, &text));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Parse(format!("error parsing caption XML: {e}"))),
            _ => {}
        }
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    pub(crate) const VIDEO: &str = "dQw4w9WgXcQ";

    /// Serves canned bodies by URL and records what was requested.
    #[derive(Default)]
    pub(crate) struct FakeHttp {
        bodies: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeHttp {
        pub(crate) fn with(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_string(), body.to_string());
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpSource for FakeHttp {
        async fn get_text(&self, url: &str) -> Result<String> {
            self.requests.lock().unwrap().push(url.to_string());
            self.bodies.get(url).cloned().ok_or(Error::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    /// Never answers; lets tests exercise cancellation.
    pub(crate) struct HangingHttp;

    #[async_trait]
    impl HttpSource for HangingHttp {
        async fn get_text(&self, _url: &str) -> Result<String> {
            std::future::pending().await
        }
    }

    pub(crate) fn watch_page(tracks: &str) -> String {
        format!(
            r#"<script>var ytInitialPlayerResponse = {{"playabilityStatus":{{"status":"OK"}},"videoDetails":{{"videoId":"{VIDEO}","title":"Test Video"}},"captions":{{"playerCaptionsTracklistRenderer":{{"captionTracks":[{tracks}]}}}}}};</script>"#
        )
    }

    pub(crate) fn track_json(lang: &str, asr: bool) -> String {
        let kind = if asr { r#","kind":"asr""# } else { "" };
        format!(r#"{{"baseUrl":"https://captions.test/{lang}{}?v={VIDEO}","languageCode":"{lang}"{kind}}}"#, if asr { "-asr" } else { "" })
    }

    pub(crate) fn caption_url(lang: &str, asr: bool) -> String {
        format!("https://captions.test/{lang}{}?v={VIDEO}&fmt=json3", if asr { "-asr" } else { "" })
    }

    pub(crate) const HELLO_WORLD: &str = r#"{"events":[{"tStartMs":0,"dDurationMs":1500},{"tStartMs":1500,"dDurationMs":2000,"segs":[{"utf8":"Hello"},{"utf8":"world"}]}]}"#;

    pub(crate) fn watch_url() -> String {
        format!("{DEFAULT_WATCH_BASE}{VIDEO}")
    }
}
