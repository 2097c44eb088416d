use std::path::PathBuf;
use std::time::Duration;

use eyre::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::format::OutputFormat;
use crate::summarize::{DEFAULT_MODEL, SafetyThreshold, SummaryOptions};

const DEFAULT_TARGET_LANG: &str = "en";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MESSAGE_TIMEOUT_SECS: u64 = 180;
const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 120;
// Message waits outlive the summary call by at least this much, so a slow
// provider reports its own timeout instead of a channel timeout.
const MESSAGE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Preferred caption language; falls back to any language when missing
    pub default_lang: Option<String>,
    /// Language ranked first among caption tracks
    pub target_lang: Option<String>,
    pub default_format: Option<OutputFormat>,
    pub default_model: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub message_timeout_secs: Option<u64>,
    pub summary: SummaryConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub safety_threshold: Option<SafetyThreshold>,
    pub stream: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<String>,
}

impl Config {
    /// Load config from ~/.config/ytcap/config.toml if it exists
    pub fn load() -> Result<Self> {
        let path = config_path();
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    pub fn target_lang(&self) -> &str {
        self.target_lang.as_deref().unwrap_or(DEFAULT_TARGET_LANG)
    }

    pub fn request_timeout(&self, cli_secs: Option<u64>) -> Duration {
        Duration::from_secs(
            cli_secs
                .or(self.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Deadline for one message round trip; never shorter than the summary
    /// timeout plus a margin.
    pub fn message_timeout(&self) -> Duration {
        let configured = Duration::from_secs(self.message_timeout_secs.unwrap_or(DEFAULT_MESSAGE_TIMEOUT_SECS));
        configured.max(self.summary_timeout() + MESSAGE_TIMEOUT_MARGIN)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary.timeout_secs.unwrap_or(DEFAULT_SUMMARY_TIMEOUT_SECS))
    }

    /// Summary options with CLI overrides applied over the config file.
    pub fn summary_options(&self, cli_model: Option<&str>, cli_stream: bool) -> SummaryOptions {
        let defaults = SummaryOptions::default();
        SummaryOptions {
            model: cli_model
                .map(str::to_string)
                .or_else(|| self.default_model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.summary.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.summary.max_tokens.unwrap_or(defaults.max_tokens),
            safety_threshold: self.summary.safety_threshold.unwrap_or(defaults.safety_threshold),
            timeout: self.summary_timeout(),
            stream: cli_stream || self.summary.stream.unwrap_or(false),
        }
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytcap")
        .join("config.toml")
}
