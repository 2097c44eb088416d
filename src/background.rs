use async_trait::async_trait;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::messenger::{Action, Handler, Messenger, Payload};
use crate::summarize::Summarizer;

/// Background worker: brokers transcript requests to the content script
/// and calls the summarization API itself, since only it holds the key.
pub struct Background {
    content: Messenger,
    summarizer: Summarizer,
}

impl Background {
    pub fn new(content: Messenger, summarizer: Summarizer) -> Self {
        Self { content, summarizer }
    }
}

#[async_trait]
impl Handler for Background {
    async fn handle(&self, action: Action, cancel: CancellationToken) -> Result<Payload> {
        match action {
            relayed @ Action::GetTranscript { .. } => {
                let ticket = self.content.submit(relayed).await?;
                let id = ticket.id();
                debug!("Relayed transcript request to content script as {id}");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.content.cancel(id).await;
                        Err(Error::Cancelled)
                    }
                    result = ticket.wait() => result,
                }
            }
            Action::Summarize { transcript } => {
                info!(
                    "Summarizing {} chars with {}",
                    transcript.len(),
                    self.summarizer.options().model
                );
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    summary = self.summarizer.summarize(&transcript) => Ok(Payload::Summary(summary?)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::content::ContentScript;
    use crate::fetcher::testing::*;
    use crate::fetcher::{FetcherConfig, HttpSource, TranscriptFetcher};
    use crate::format::OutputFormat;
    use crate::messenger::channel;
    use crate::page_state::NoEmbeddedState;
    use crate::summarize::SummaryOptions;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn summarizer() -> Summarizer {
        Summarizer::new(reqwest::Client::new(), SummaryOptions::default(), None)
    }

    fn background_for<H: HttpSource + 'static>(http: H) -> Background {
        let (content, endpoint) = channel(8, TIMEOUT);
        let fetcher = TranscriptFetcher::new(http, NoEmbeddedState, FetcherConfig::default());
        tokio::spawn(endpoint.serve(Arc::new(ContentScript::new(fetcher))));
        Background::new(content, summarizer())
    }

    fn get() -> Action {
        Action::GetTranscript {
            video_id: VIDEO.to_string(),
            lang: None,
            format: OutputFormat::Text,
        }
    }

    #[tokio::test]
    async fn test_relays_transcript_request() {
        let http = FakeHttp::default()
            .with(&watch_url(), &watch_page(&track_json("en", false)))
            .with(&caption_url("en", false), HELLO_WORLD);
        let payload = background_for(http)
            .handle(get(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, Payload::Transcript("0:01 Hello world".to_string()));
    }

    #[tokio::test]
    async fn test_relays_content_failure_verbatim() {
        let http = FakeHttp::default().with(&watch_url(), &watch_page(""));
        let err = background_for(http)
            .handle(get(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "⚠ no captions available for this video");
    }

    #[tokio::test]
    async fn test_cancelled_relay() {
        let background = background_for(HangingHttp);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = background.handle(get(), cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_content_script_gone() {
        let (content, endpoint) = channel(8, TIMEOUT);
        drop(endpoint);
        let background = Background::new(content, summarizer());
        let err = background.handle(get(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn test_summarize_without_key() {
        let background = background_for(FakeHttp::default());
        let err = background
            .handle(
                Action::Summarize {
                    transcript: "0:01 Hello world".to_string(),
                },
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Summarization(crate::SummarizationError::InvalidCredential(_))
        ));
    }
}
