use async_trait::async_trait;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::VideoId;
use crate::error::{Error, Result};
use crate::fetcher::{HttpSource, TranscriptFetcher};
use crate::format::render;
use crate::messenger::{Action, Handler, Payload};
use crate::page_state::EmbeddedState;

/// Page-side handler: owns the fetcher and answers transcript requests.
pub struct ContentScript<H, S> {
    fetcher: TranscriptFetcher<H, S>,
}

impl<H, S> ContentScript<H, S> {
    pub fn new(fetcher: TranscriptFetcher<H, S>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<H, S> Handler for ContentScript<H, S>
where
    H: HttpSource + 'static,
    S: EmbeddedState + 'static,
{
    async fn handle(&self, action: Action, cancel: CancellationToken) -> Result<Payload> {
        match action {
            Action::GetTranscript { video_id, lang, format } => {
                let video_id = VideoId::parse(&video_id)?;
                let transcript = match lang.as_deref() {
                    Some(lang) => self.fetcher.fetch_preferring(&video_id, lang, &cancel).await?,
                    None => self.fetcher.fetch(&video_id, &cancel).await?,
                };
                info!(
                    "Extracted {} entries for {} ({}, {})",
                    transcript.entries.len(),
                    transcript.video_id,
                    transcript.language,
                    transcript.kind
                );
                Ok(Payload::Transcript(render(&transcript, format)))
            }
            Action::Summarize { .. } => Err(Error::Unsupported("summarize is handled by the background worker")),
        }
    }
}
