use clap::Parser;
use std::path::PathBuf;

use ytcap::format::OutputFormat;

#[derive(Parser)]
#[command(
    name = "ytcap",
    about = "YouTube caption extractor and summarizer",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// YouTube video URL or video ID (reads from stdin if omitted)
    pub url: Option<String>,

    /// Summarize the transcript via LLM
    #[arg(short, long)]
    pub summarize: bool,

    /// Output format: text (default), plain, json, srt
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Preferred caption language; any language is used if it has no track
    #[arg(short, long)]
    pub lang: Option<String>,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Saved watch page to read the player response from instead of fetching it
    #[arg(long, value_name = "FILE")]
    pub page_html: Option<PathBuf>,

    /// LLM model for summarization
    #[arg(long)]
    pub model: Option<String>,

    /// Stream the summary response
    #[arg(long)]
    pub stream: bool,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Show config and log locations
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unset() {
        let cli = Cli::try_parse_from(["ytcap", "dQw4w9WgXcQ"]).unwrap();
        assert_eq!(cli.url.as_deref(), Some("dQw4w9WgXcQ"));
        assert!(cli.format.is_none());
        assert!(cli.lang.is_none());
        assert!(!cli.summarize);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "ytcap",
            "-s",
            "-f",
            "srt",
            "-l",
            "ko",
            "--page-html",
            "watch.html",
            "--timeout",
            "5",
        ])
        .unwrap();
        assert!(cli.url.is_none());
        assert!(cli.summarize);
        assert_eq!(cli.format, Some(OutputFormat::Srt));
        assert_eq!(cli.lang.as_deref(), Some("ko"));
        assert_eq!(cli.page_html, Some(PathBuf::from("watch.html")));
        assert_eq!(cli.timeout, Some(5));
    }
}
