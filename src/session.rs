use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use tokio::sync::Mutex;

use crate::VideoId;
use crate::error::Result;
use crate::format::OutputFormat;
use crate::messenger::{Action, Messenger, Payload};

/// What the popup shows after a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Ready(String),
    /// `⚠`-prefixed message
    Failed(String),
    /// A newer trigger started before this one finished; show nothing.
    Superseded,
}

/// Popup side of the extension. Each trigger sends one request; starting a
/// new one cancels the request before it and its late result is dropped.
pub struct Session {
    messenger: Messenger,
    generation: AtomicU64,
    in_flight: Mutex<Option<u64>>,
}

impl Session {
    pub fn new(messenger: Messenger) -> Self {
        Self {
            messenger,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    /// Extract the transcript of the video shown at `page_url`.
    pub async fn extract(&self, page_url: &str, lang: Option<String>, format: OutputFormat) -> View {
        let generation = self.begin().await;
        let video_id = match VideoId::from_url(page_url) {
            Ok(id) => id,
            Err(e) => return self.finish(generation, Err(e)),
        };
        let action = Action::GetTranscript {
            video_id: video_id.to_string(),
            lang,
            format,
        };
        self.run(generation, action).await
    }

    pub async fn summarize(&self, transcript: &str) -> View {
        let generation = self.begin().await;
        let action = Action::Summarize {
            transcript: transcript.to_string(),
        };
        self.run(generation, action).await
    }

    async fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.in_flight.lock().await.take() {
            self.messenger.cancel(previous).await;
        }
        generation
    }

    async fn run(&self, generation: u64, action: Action) -> View {
        let ticket = match self.messenger.submit(action).await {
            Ok(ticket) => ticket,
            Err(e) => return self.finish(generation, Err(e)),
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            if self.is_current(generation) {
                *in_flight = Some(ticket.id());
            } else {
                // A newer trigger began while this one was being sent.
                drop(in_flight);
                self.messenger.cancel(ticket.id()).await;
            }
        }

        let id = ticket.id();
        let result = ticket.wait().await;

        let mut in_flight = self.in_flight.lock().await;
        if *in_flight == Some(id) {
            *in_flight = None;
        }
        drop(in_flight);

        self.finish(generation, result)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn finish(&self, generation: u64, result: Result<Payload>) -> View {
        if !self.is_current(generation) {
            debug!("Discarding result of superseded request (generation {generation})");
            return View::Superseded;
        }
        match result {
            Ok(payload) => View::Ready(payload.into_text()),
            Err(e) => View::Failed(e.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::Error;
    use crate::messenger::{Handler, channel};

    const FIRST: &str = "https://www.youtube.com/watch?v=aaaaaaaaaaa";
    const SECOND: &str = "https://youtu.be/bbbbbbbbbbb";

    /// Blocks on the first video until cancelled; answers others at once.
    struct Popup {
        started: mpsc::Sender<()>,
        saw_cancel: AtomicBool,
    }

    #[async_trait]
    impl Handler for Popup {
        async fn handle(&self, action: Action, cancel: CancellationToken) -> crate::Result<Payload> {
            match action {
                Action::GetTranscript { video_id, .. } if video_id == "aaaaaaaaaaa" => {
                    let _ = self.started.send(()).await;
                    cancel.cancelled().await;
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Err(Error::Cancelled)
                }
                Action::GetTranscript { video_id, .. } if video_id == "ccccccccccc" => Err(Error::NoCaptions),
                Action::GetTranscript { video_id, .. } => Ok(Payload::Transcript(format!("0:00 {video_id}"))),
                Action::Summarize { transcript } => Ok(Payload::Summary(format!("summary of {transcript}"))),
            }
        }
    }

    fn session() -> (Arc<Session>, Arc<Popup>, mpsc::Receiver<()>) {
        let (messenger, endpoint) = channel(8, Duration::from_secs(5));
        let (started, started_rx) = mpsc::channel(1);
        let handler = Arc::new(Popup {
            started,
            saw_cancel: AtomicBool::new(false),
        });
        tokio::spawn(endpoint.serve(handler.clone()));
        (Arc::new(Session::new(messenger)), handler, started_rx)
    }

    #[tokio::test]
    async fn test_extract_ready() {
        let (session, _, _) = session();
        assert_eq!(
            session.extract(SECOND, None, OutputFormat::Text).await,
            View::Ready("0:00 bbbbbbbbbbb".to_string())
        );
    }

    #[tokio::test]
    async fn test_extract_failure_is_marked() {
        let (session, _, _) = session();
        assert_eq!(
            session
                .extract("https://www.youtube.com/watch?v=ccccccccccc", None, OutputFormat::Text)
                .await,
            View::Failed("⚠ no captions available for this video".to_string())
        );
    }

    #[tokio::test]
    async fn test_not_a_video_page_fails_locally() {
        let (session, _, _) = session();
        match session.extract("https://www.youtube.com/", None, OutputFormat::Text).await {
            View::Failed(message) => assert!(message.starts_with("⚠ could not find a valid YouTube video ID")),
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_summarize() {
        let (session, _, _) = session();
        assert_eq!(
            session.summarize("0:00 hi").await,
            View::Ready("summary of 0:00 hi".to_string())
        );
    }

    #[tokio::test]
    async fn test_newer_request_wins() {
        let (session, handler, mut started) = session();

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.extract(FIRST, None, OutputFormat::Text).await }
        });
        started.recv().await.unwrap();

        let second = session.extract(SECOND, None, OutputFormat::Text).await;
        assert_eq!(second, View::Ready("0:00 bbbbbbbbbbb".to_string()));
        assert_eq!(first.await.unwrap(), View::Superseded);
        assert!(handler.saw_cancel.load(Ordering::SeqCst));
    }
}
