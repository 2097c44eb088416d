use std::time::Duration;

use thiserror::Error;

/// Prefix on every user-facing failure line so callers can branch on it
/// without inspecting the error type.
pub const WARNING_MARKER: &str = "⚠";

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not find a valid YouTube video ID in {0:?}")]
    NotFound(String),

    #[error("unable to parse player response: {0}")]
    Parse(String),

    #[error("no captions available for this video")]
    NoCaptions,

    #[error("no '{lang}' caption track (available: {})", .available.join(", "))]
    LanguageUnavailable { lang: String, available: Vec<String> },

    #[error("no transcript available for this video")]
    EmptyTranscript,

    #[error("video is not playable: {0}")]
    Unplayable(String),

    #[error("YouTube is rate limiting requests from this IP (captcha required)")]
    RateLimited,

    #[error("message channel closed before a response arrived")]
    ChannelClosed,

    #[error("no response within {0:?}")]
    TimedOut(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Summarization(#[from] SummarizationError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// A failure already rendered by the other side of a message channel.
    #[error("{0}")]
    Remote(String),

    #[error("action not supported here: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Render the error the way the popup shows it: marker, space, message.
    pub fn user_message(&self) -> String {
        match self {
            Error::Remote(msg) if msg.starts_with(WARNING_MARKER) => msg.clone(),
            other => format!("{WARNING_MARKER} {other}"),
        }
    }
}

/// Failures of the summarization collaborator, one variant per category the
/// user needs to tell apart.
#[derive(Error, Debug)]
pub enum SummarizationError {
    #[error("invalid or exhausted API credential: {0}")]
    InvalidCredential(String),

    #[error("content blocked by the provider: {0}")]
    ContentBlocked(String),

    #[error("summarization timed out after {0:?}")]
    Timeout(Duration),

    #[error("summarization API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("summarization request failed: {0}")]
    Transport(String),

    #[error("unexpected summarization response: {0}")]
    MalformedResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
