use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SummarizationError;

const DEFAULT_SYSTEM_PROMPT: &str = "You receive the auto-extracted captions of a YouTube video as \
`M:SS text` lines. Captions may be machine generated, so ignore filler words and obvious recognition \
errors. Reply with a short overview paragraph followed by the main points as a bulleted list, citing \
the timestamp where each point starts.";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const GEMINI_API: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const ANTHROPIC_API: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_API: &str = "https://api.openai.com/v1/chat/completions";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

type SummaryResult<T> = std::result::Result<T, SummarizationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("claude") {
            Provider::Anthropic
        } else if model.starts_with("gemini") {
            Provider::Gemini
        } else {
            Provider::OpenAi
        }
    }

    pub fn key_env_var(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Gemini safety threshold applied to every harm category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyThreshold {
    BlockNone,
    BlockOnlyHigh,
    #[default]
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl SafetyThreshold {
    fn api_name(&self) -> &'static str {
        match self {
            SafetyThreshold::BlockNone => "BLOCK_NONE",
            SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub safety_threshold: SafetyThreshold,
    pub timeout: Duration,
    /// Request the response incrementally and concatenate the chunks
    pub stream: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            safety_threshold: SafetyThreshold::default(),
            timeout: Duration::from_secs(120),
            stream: false,
        }
    }
}

/// Client for the summarization collaborator
pub struct Summarizer {
    client: reqwest::Client,
    options: SummaryOptions,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl Summarizer {
    pub fn new(client: reqwest::Client, options: SummaryOptions, api_key: Option<String>) -> Self {
        Self {
            client,
            options,
            api_key,
            base_url: None,
        }
    }

    /// Send requests to `base_url` instead of the provider's public API
    /// (a proxy or a local stand-in).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Use the provider's environment variable, then `fallback_key`.
    pub fn from_env(client: reqwest::Client, options: SummaryOptions, fallback_key: Option<String>) -> Self {
        let var = Provider::for_model(&options.model).key_env_var();
        let api_key = std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or(fallback_key);
        Self::new(client, options, api_key)
    }

    pub fn options(&self) -> &SummaryOptions {
        &self.options
    }

    fn provider(&self) -> Provider {
        Provider::for_model(&self.options.model)
    }

    fn endpoint(&self, provider: Provider) -> &str {
        self.base_url.as_deref().unwrap_or(match provider {
            Provider::Gemini => GEMINI_API,
            Provider::Anthropic => ANTHROPIC_API,
            Provider::OpenAi => OPENAI_API,
        })
    }

    fn api_key(&self) -> SummaryResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| SummarizationError::InvalidCredential(format!("{} is not set", self.provider().key_env_var())))
    }

    /// Summarize a transcript, honouring the stream option. The whole call,
    /// streamed or not, is bounded by the configured timeout.
    pub async fn summarize(&self, transcript_text: &str) -> SummaryResult<String> {
        let work = async {
            if self.options.stream {
                collect_stream(self.summarize_stream(transcript_text).await?).await
            } else {
                self.summarize_once(transcript_text).await
            }
        };
        tokio::time::timeout(self.options.timeout, work)
            .await
            .map_err(|_| SummarizationError::Timeout(self.options.timeout))?
    }

    async fn summarize_once(&self, transcript_text: &str) -> SummaryResult<String> {
        let api_key = self.api_key()?;
        let provider = self.provider();
        let prompt = build_prompt(transcript_text);
        let model = &self.options.model;
        let endpoint = self.endpoint(provider);
        debug!("Summarizing via {provider:?} with model {model}");

        let request = match provider {
            Provider::Gemini => self
                .client
                .post(format!("{endpoint}/{model}:generateContent"))
                .header("x-goog-api-key", api_key)
                .json(&gemini_body(&prompt, &self.options)),
            Provider::Anthropic => self
                .client
                .post(endpoint)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&anthropic_body(&prompt, &self.options)),
            Provider::OpenAi => self
                .client
                .post(endpoint)
                .bearer_auth(api_key)
                .json(&openai_body(&prompt, &self.options)),
        };

        let json: Value = send(request)
            .await?
            .json()
            .await
            .map_err(|e| {
                if e.is_decode() {
                    SummarizationError::MalformedResponse(e.to_string())
                } else {
                    SummarizationError::Transport(e.to_string())
                }
            })?;

        let text = match provider {
            Provider::Gemini => extract_gemini_text(&json)?,
            Provider::Anthropic => extract_anthropic_text(&json)?,
            Provider::OpenAi => extract_openai_text(&json)?,
        };
        if text.trim().is_empty() {
            return Err(SummarizationError::MalformedResponse(format!("empty {provider:?} response")));
        }
        Ok(text)
    }

    /// Stream the summary as it is generated. Gemini streams over SSE; the
    /// other providers yield their whole response as a single chunk.
    pub async fn summarize_stream(&self, transcript_text: &str) -> SummaryResult<BoxStream<'static, SummaryResult<String>>> {
        if self.provider() != Provider::Gemini {
            let text = self.summarize_once(transcript_text).await?;
            return Ok(stream::once(async move { Ok(text) }).boxed());
        }

        let api_key = self.api_key()?;
        let prompt = build_prompt(transcript_text);
        debug!("Streaming summary via Gemini with model {}", self.options.model);

        let request = self
            .client
            .post(format!(
                "{}/{}:streamGenerateContent?alt=sse",
                self.endpoint(Provider::Gemini),
                self.options.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&gemini_body(&prompt, &self.options));

        let resp = send(request).await?;
        Ok(gemini_chunks(resp))
    }
}

/// Concatenate a chunk stream into the full summary.
pub async fn collect_stream(chunks: BoxStream<'_, SummaryResult<String>>) -> SummaryResult<String> {
    let text: String = chunks.try_collect().await?;
    if text.trim().is_empty() {
        return Err(SummarizationError::MalformedResponse("empty streamed response".to_string()));
    }
    Ok(text)
}

fn build_prompt(transcript_text: &str) -> String {
    format!("Summarize this video transcript:\n\n{transcript_text}")
}

/// The caller's `options.timeout` is the only deadline; a client-level
/// timeout surfaces as a transport failure.
async fn send(request: reqwest::RequestBuilder) -> SummaryResult<reqwest::Response> {
    let resp = request
        .send()
        .await
        .map_err(|e| SummarizationError::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body));
    }
    Ok(resp)
}

/// Map a failed HTTP status to the category the user sees.
fn classify_status(status: u16, body: &str) -> SummarizationError {
    match status {
        401 | 403 => SummarizationError::InvalidCredential(format!("provider rejected the API key (HTTP {status})")),
        429 => SummarizationError::InvalidCredential("API quota exhausted (HTTP 429)".to_string()),
        400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
            SummarizationError::InvalidCredential("API key not valid".to_string())
        }
        408 | 504 => SummarizationError::Transport(format!("provider timed out (HTTP {status})")),
        _ => SummarizationError::Api {
            status,
            body: body.chars().take(500).collect(),
        },
    }
}

fn gemini_body(prompt: &str, options: &SummaryOptions) -> Value {
    let safety: Vec<Value> = HARM_CATEGORIES
        .iter()
        .map(|category| {
            serde_json::json!({
                "category": category,
                "threshold": options.safety_threshold.api_name()
            })
        })
        .collect();

    serde_json::json!({
        "systemInstruction": { "parts": [{ "text": DEFAULT_SYSTEM_PROMPT }] },
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": options.temperature,
            "maxOutputTokens": options.max_tokens
        },
        "safetySettings": safety
    })
}

fn anthropic_body(prompt: &str, options: &SummaryOptions) -> Value {
    serde_json::json!({
        "model": options.model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "system": DEFAULT_SYSTEM_PROMPT,
        "messages": [
            {
                "role": "user",
                "content": prompt
            }
        ]
    })
}

fn openai_body(prompt: &str, options: &SummaryOptions) -> Value {
    serde_json::json!({
        "model": options.model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "messages": [
            {
                "role": "system",
                "content": DEFAULT_SYSTEM_PROMPT
            },
            {
                "role": "user",
                "content": prompt
            }
        ]
    })
}

/// Text of one Gemini response (or stream chunk). May be empty for chunks
/// that only carry metadata.
fn extract_gemini_text(json: &Value) -> SummaryResult<String> {
    if let Some(reason) = json.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
        return Err(SummarizationError::ContentBlocked(format!("prompt blocked ({reason})")));
    }

    let candidate = json.pointer("/candidates/0");
    if let Some(reason) = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .filter(|r| matches!(*r, "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII"))
    {
        return Err(SummarizationError::ContentBlocked(format!("response blocked ({reason})")));
    }

    Ok(candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default())
}

/// Concatenated `text` blocks of a Messages API reply. Tool-use and
/// thinking blocks are skipped.
fn extract_anthropic_text(json: &Value) -> SummaryResult<String> {
    match json.get("stop_reason").and_then(Value::as_str) {
        Some("refusal") => return Err(SummarizationError::ContentBlocked("model refused the request".to_string())),
        Some(reason) => debug!("Anthropic stop reason: {reason}"),
        None => {}
    }

    let text: String = json
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        return Err(SummarizationError::MalformedResponse("no text blocks in Anthropic reply".to_string()));
    }
    Ok(text)
}

fn extract_openai_text(json: &Value) -> SummaryResult<String> {
    let choice = json.get("choices").and_then(|c| c.get(0));
    if choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str) == Some("content_filter") {
        return Err(SummarizationError::ContentBlocked("content_filter".to_string()));
    }
    if let Some(text) = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
    {
        return Ok(text.to_string());
    }
    Err(SummarizationError::MalformedResponse(
        "unexpected OpenAI API response format".to_string(),
    ))
}

/// Splits a server-sent-events byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Feed bytes; returns the payloads of every line completed by them.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            payloads.extend(data_payload(&line));
        }
        payloads
    }

    /// Payload of a final line that was not newline-terminated.
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim_end_matches(['\n', '\r']).strip_prefix("data:")?.trim_start();
    (!payload.is_empty() && payload != "[DONE]").then(|| payload.to_string())
}

fn decode_gemini_event(data: &str) -> SummaryResult<String> {
    let json: Value =
        serde_json::from_str(data).map_err(|e| SummarizationError::MalformedResponse(format!("bad stream event: {e}")))?;
    extract_gemini_text(&json)
}

fn gemini_chunks(resp: reqwest::Response) -> BoxStream<'static, SummaryResult<String>> {
    let bytes = resp.bytes_stream().boxed();
    let state = (bytes, SseBuffer::default(), VecDeque::new(), false);

    stream::unfold(state, |(mut bytes, mut buffer, mut ready, mut done)| async move {
        loop {
            if let Some(item) = ready.pop_front() {
                return Some((item, (bytes, buffer, ready, done)));
            }
            if done {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => ready.extend(buffer.push(&chunk).iter().map(|d| decode_gemini_event(d))),
                Some(Err(e)) => {
                    done = true;
                    ready.push_back(Err(SummarizationError::Transport(e.to_string())));
                }
                None => {
                    done = true;
                    ready.extend(buffer.finish().map(|d| decode_gemini_event(&d)));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_for_model() {
        assert_eq!(Provider::for_model("gemini-2.0-flash"), Provider::Gemini);
        assert_eq!(Provider::for_model("claude-sonnet-4-6"), Provider::Anthropic);
        assert_eq!(Provider::for_model("gpt-4o"), Provider::OpenAi);
        assert_eq!(Provider::for_model("gpt-4o-mini"), Provider::OpenAi);
    }

    #[test]
    fn test_gemini_body() {
        let options = SummaryOptions {
            temperature: 0.2,
            max_tokens: 1024,
            safety_threshold: SafetyThreshold::BlockOnlyHigh,
            ..SummaryOptions::default()
        };
        let body = gemini_body("Summarize this", &options);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Summarize this");
        assert_eq!(body["generationConfig"]["temperature"], 0.2);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_ONLY_HIGH"));
    }

    #[test]
    fn test_anthropic_and_openai_bodies() {
        let options = SummaryOptions {
            model: "claude-sonnet-4-6".to_string(),
            ..SummaryOptions::default()
        };
        let body = anthropic_body("prompt", &options);
        assert_eq!(body["model"], "claude-sonnet-4-6");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["content"], "prompt");

        let body = openai_body("prompt", &options);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "prompt");
    }

    #[test]
    fn test_extract_gemini_text() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Key " }, { "text": "points." }] },
                "finishReason": "STOP"
            }]
        });
        assert_eq!(extract_gemini_text(&json).unwrap(), "Key points.");
    }

    #[test]
    fn test_extract_gemini_blocked_prompt() {
        let json = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(
            extract_gemini_text(&json),
            Err(SummarizationError::ContentBlocked(_))
        ));
    }

    #[test]
    fn test_extract_gemini_blocked_response() {
        let json = serde_json::json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert!(matches!(
            extract_gemini_text(&json),
            Err(SummarizationError::ContentBlocked(_))
        ));
    }

    #[test]
    fn test_extract_anthropic_text() {
        let json = serde_json::json!({
            "content": [
                {
                    "type": "text",
                    "text": "Here is the summary."
                }
            ]
        });
        assert_eq!(extract_anthropic_text(&json).unwrap(), "Here is the summary.");
    }

    #[test]
    fn test_extract_anthropic_text_empty() {
        let json = serde_json::json!({"content": []});
        assert!(matches!(
            extract_anthropic_text(&json),
            Err(SummarizationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_extract_anthropic_refusal() {
        let json = serde_json::json!({"content": [], "stop_reason": "refusal"});
        assert!(matches!(
            extract_anthropic_text(&json),
            Err(SummarizationError::ContentBlocked(_))
        ));
    }

    #[test]
    fn test_extract_openai_text() {
        let json = serde_json::json!({
            "choices": [
                {
                    "message": {
                        "role": "assistant",
                        "content": "Summary of the video."
                    }
                }
            ]
        });
        assert_eq!(extract_openai_text(&json).unwrap(), "Summary of the video.");
    }

    #[test]
    fn test_extract_openai_content_filter() {
        let json = serde_json::json!({"choices": [{"finish_reason": "content_filter", "message": {"content": null}}]});
        assert!(matches!(
            extract_openai_text(&json),
            Err(SummarizationError::ContentBlocked(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, ""), SummarizationError::InvalidCredential(_)));
        assert!(matches!(classify_status(429, ""), SummarizationError::InvalidCredential(_)));
        assert!(matches!(
            classify_status(400, r#"{"error":{"message":"API key not valid. Please pass a valid API key."}}"#),
            SummarizationError::InvalidCredential(_)
        ));
        assert!(matches!(
            classify_status(500, "boom"),
            SummarizationError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_classify_gateway_timeouts_as_transport() {
        for status in [408, 504] {
            match classify_status(status, "") {
                SummarizationError::Transport(message) => assert!(message.contains(&status.to_string())),
                other => panic!("unexpected error for {status}: {other:?}"),
            }
        }
    }

    /// Accepts connections and never answers them.
    async fn silent_provider() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let options = SummaryOptions {
            timeout: Duration::from_millis(200),
            ..SummaryOptions::default()
        };
        let summarizer = Summarizer::new(reqwest::Client::new(), options, Some("key".to_string()))
            .with_base_url(silent_provider().await);
        match summarizer.summarize("0:01 Hello world").await {
            Err(SummarizationError::Timeout(after)) => assert_eq!(after, Duration::from_millis(200)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_stream_times_out() {
        let options = SummaryOptions {
            timeout: Duration::from_millis(200),
            stream: true,
            ..SummaryOptions::default()
        };
        let summarizer = Summarizer::new(reqwest::Client::new(), options, Some("key".to_string()))
            .with_base_url(silent_provider().await);
        assert!(matches!(
            summarizer.summarize("0:01 Hello world").await,
            Err(SummarizationError::Timeout(_))
        ));
    }

    #[test]
    fn test_sse_buffer_splits_across_chunks() {
        let mut buffer = SseBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b":1}\r\n\r\ndata: [DONE]\n"), vec![r#"{"a":1}"#.to_string()]);
        assert!(buffer.push(b": keep-alive\n").is_empty());
        buffer.push(b"data: tail");
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_decode_gemini_event() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"chunk"}]}}]}"#;
        assert_eq!(decode_gemini_event(data).unwrap(), "chunk");
        assert!(decode_gemini_event("not json").is_err());
    }

    #[tokio::test]
    async fn test_collect_stream_concatenates() {
        let chunks = stream::iter(vec![Ok("Hello, ".to_string()), Ok(String::new()), Ok("world".to_string())]).boxed();
        assert_eq!(collect_stream(chunks).await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn test_collect_stream_propagates_errors() {
        let chunks = stream::iter(vec![
            Ok("partial".to_string()),
            Err(SummarizationError::ContentBlocked("SAFETY".to_string())),
        ])
        .boxed();
        assert!(matches!(
            collect_stream(chunks).await,
            Err(SummarizationError::ContentBlocked(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_invalid_credential() {
        let summarizer = Summarizer::new(reqwest::Client::new(), SummaryOptions::default(), None);
        match summarizer.summarize("some transcript").await {
            Err(SummarizationError::InvalidCredential(message)) => assert!(message.contains("GEMINI_API_KEY")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
