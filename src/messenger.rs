use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::format::OutputFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    GetTranscript {
        video_id: String,
        #[serde(default)]
        lang: Option<String>,
        #[serde(default)]
        format: OutputFormat,
    },
    Summarize {
        transcript: String,
    },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::GetTranscript { .. } => "getTranscript",
            Action::Summarize { .. } => "summarize",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "camelCase")]
pub enum Payload {
    Transcript(String),
    Summary(String),
}

impl Payload {
    pub fn into_text(self) -> String {
        match self {
            Payload::Transcript(text) | Payload::Summary(text) => text,
        }
    }
}

/// Result of one request as it crosses the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Success(Payload),
    /// Already rendered for display (`⚠ ...`)
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    Request { id: u64, action: Action },
    Cancel { id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome,
}

/// Answers requests arriving at an `Endpoint`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, action: Action, cancel: CancellationToken) -> Result<Payload>;
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
    closed: bool,
}

type SharedPending = Arc<Mutex<Pending>>;

/// Requesting side of a channel
pub struct Messenger {
    outbound: mpsc::Sender<Message>,
    pending: SharedPending,
    next_id: AtomicU64,
    timeout: Duration,
}

/// Responding side of a channel; consumed by `serve`.
pub struct Endpoint {
    inbound: mpsc::Receiver<Message>,
    outbound: mpsc::Sender<Response>,
}

/// A submitted request waiting for its response
pub struct Ticket {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    timeout: Duration,
    pending: SharedPending,
    outbound: mpsc::Sender<Message>,
}

/// Open a request/response channel between two roles. Each request carries
/// a correlation id and resolves once: the peer's payload or failure,
/// `TimedOut` when the peer stays silent, `ChannelClosed` when it goes away.
///
/// Must be called inside a tokio runtime: responses are routed to their
/// waiters by a spawned task.
pub fn channel(capacity: usize, timeout: Duration) -> (Messenger, Endpoint) {
    let (message_tx, message_rx) = mpsc::channel(capacity);
    let (response_tx, response_rx) = mpsc::channel(capacity);
    let pending = SharedPending::default();

    tokio::spawn(route_responses(response_rx, pending.clone()));

    let messenger = Messenger {
        outbound: message_tx,
        pending,
        next_id: AtomicU64::new(0),
        timeout,
    };
    let endpoint = Endpoint {
        inbound: message_rx,
        outbound: response_tx,
    };
    (messenger, endpoint)
}

async fn route_responses(mut responses: mpsc::Receiver<Response>, pending: SharedPending) {
    while let Some(Response { id, outcome }) = responses.recv().await {
        match pending.lock().await.waiters.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(outcome);
            }
            None => debug!("Dropping response for unknown or expired request {id}"),
        }
    }

    // Dropping the senders wakes every waiter with ChannelClosed.
    let mut pending = pending.lock().await;
    pending.closed = true;
    if !pending.waiters.is_empty() {
        warn!("Channel closed with {} request(s) unanswered", pending.waiters.len());
    }
    pending.waiters.clear();
}

impl Messenger {
    /// Send a request and wait for its response.
    pub async fn request(&self, action: Action) -> Result<Payload> {
        self.submit(action).await?.wait().await
    }

    /// Send a request without waiting, so the caller can cancel it by id.
    pub async fn submit(&self, action: Action) -> Result<Ticket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(Error::ChannelClosed);
            }
            pending.waiters.insert(id, tx);
        }

        debug!("Sending request {id} ({})", action.name());
        if self.outbound.send(Message::Request { id, action }).await.is_err() {
            self.pending.lock().await.waiters.remove(&id);
            return Err(Error::ChannelClosed);
        }

        Ok(Ticket {
            id,
            rx,
            timeout: self.timeout,
            pending: self.pending.clone(),
            outbound: self.outbound.clone(),
        })
    }

    /// Ask the endpoint to cancel an in-flight request. The request still
    /// resolves, with the endpoint's cancellation failure.
    pub async fn cancel(&self, id: u64) {
        debug!("Cancelling request {id}");
        if self.outbound.send(Message::Cancel { id }).await.is_err() {
            debug!("Channel already closed; nothing to cancel for {id}");
        }
    }
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<Payload> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(Outcome::Success(payload))) => Ok(payload),
            Ok(Ok(Outcome::Failure(message))) => Err(Error::Remote(message)),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                warn!("Request {} timed out after {:?}", self.id, self.timeout);
                self.pending.lock().await.waiters.remove(&self.id);
                let _ = self.outbound.send(Message::Cancel { id: self.id }).await;
                Err(Error::TimedOut(self.timeout))
            }
        }
    }
}

impl Endpoint {
    /// Answer requests until the requesting side hangs up. Each request runs
    /// on its own task with its own cancellation token.
    pub async fn serve<H: Handler>(mut self, handler: Arc<H>) {
        let root = CancellationToken::new();
        let in_flight: Arc<Mutex<HashMap<u64, CancellationToken>>> = Arc::default();

        while let Some(message) = self.inbound.recv().await {
            match message {
                Message::Request { id, action } => {
                    let token = root.child_token();
                    in_flight.lock().await.insert(id, token.clone());

                    let handler = handler.clone();
                    let outbound = self.outbound.clone();
                    let in_flight = in_flight.clone();
                    tokio::spawn(async move {
                        let outcome = match handler.handle(action, token).await {
                            Ok(payload) => Outcome::Success(payload),
                            Err(e) => {
                                debug!("Request {id} failed: {e}");
                                Outcome::Failure(e.user_message())
                            }
                        };
                        in_flight.lock().await.remove(&id);
                        if outbound.send(Response { id, outcome }).await.is_err() {
                            debug!("Requester went away before response {id}");
                        }
                    });
                }
                Message::Cancel { id } => match in_flight.lock().await.get(&id) {
                    Some(token) => token.cancel(),
                    None => debug!("Cancel for {id} arrived after it finished"),
                },
            }
        }

        root.cancel();
    }
}
