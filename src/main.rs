use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Result, bail};
use log::{debug, info, warn};

use ytcap::background::Background;
use ytcap::config::{Config, config_path};
use ytcap::content::ContentScript;
use ytcap::fetcher::{FetcherConfig, ReqwestSource, TranscriptFetcher};
use ytcap::messenger::channel;
use ytcap::page_state::{EmbeddedState, NoEmbeddedState, PageSnapshot};
use ytcap::session::{Session, View};
use ytcap::summarize::{Provider, Summarizer};

mod cli;

use cli::Cli;

const CHANNEL_CAPACITY: usize = 16;

fn setup_logging() -> Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("ytcap.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytcap")
        .join("logs")
}

fn key_line(provider: Provider) -> String {
    let var = provider.key_env_var();
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => format!("  \x1b[32m✅\x1b[0m {var}"),
        _ => format!("  \x1b[31m❌\x1b[0m {var}  (not set)"),
    }
}

fn build_after_help() -> String {
    let keys = [Provider::Gemini, Provider::Anthropic, Provider::OpenAi]
        .into_iter()
        .map(key_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "\nSUMMARY API KEYS:\n{keys}\n\nConfig is read from: {}\nLogs are written to: {}",
        config_path().display(),
        log_dir().join("ytcap.log").display()
    )
}

fn embedded_state(cli: &Cli) -> Result<Box<dyn EmbeddedState>> {
    match &cli.page_html {
        Some(path) => {
            let html = std::fs::read_to_string(path)?;
            let snapshot = PageSnapshot::from_html(&html)?;
            debug!("Using player response from {}", path.display());
            Ok(Box::new(snapshot))
        }
        None => Ok(Box::new(NoEmbeddedState)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let after_help = build_after_help();
    let cmd = <Cli as clap::CommandFactory>::command().after_help(after_help);
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    // Load config file (non-fatal if missing/invalid)
    let config = Config::load().unwrap_or_else(|e| {
        warn!("Ignoring config file: {e}");
        Config::default()
    });

    // CLI flags take priority over config
    let lang = cli.lang.clone().or_else(|| config.default_lang.clone());
    let format = cli.format.or(config.default_format).unwrap_or_default();
    let request_timeout = config.request_timeout(cli.timeout);
    let message_timeout = config.message_timeout();

    if cli.verbose {
        let path = config_path();
        if path.exists() {
            eprintln!("Config: {}", path.display());
        }
        eprintln!("Logs: {}", log_dir().join("ytcap.log").display());
    }

    let http = ReqwestSource::new(request_timeout)?;
    let fetcher = TranscriptFetcher::new(
        http,
        embedded_state(&cli)?,
        FetcherConfig {
            target_lang: config.target_lang().to_string(),
            ..FetcherConfig::default()
        },
    );

    let (content_messenger, content_endpoint) = channel(CHANNEL_CAPACITY, message_timeout);
    tokio::spawn(content_endpoint.serve(Arc::new(ContentScript::new(fetcher))));

    // Separate client: the summary timeout is the only deadline on LLM calls
    let options = config.summary_options(cli.model.as_deref(), cli.stream);
    debug!("Summary model: {} (timeout {:?})", options.model, options.timeout);
    let summarizer = Summarizer::from_env(reqwest::Client::new(), options, config.summary.api_key.clone());

    let (background_messenger, background_endpoint) = channel(CHANNEL_CAPACITY, message_timeout);
    tokio::spawn(background_endpoint.serve(Arc::new(Background::new(content_messenger, summarizer))));

    let session = Session::new(background_messenger);

    // Collect URLs: from arg or stdin
    let urls = if let Some(ref url) = cli.url {
        vec![url.clone()]
    } else {
        let stdin = io::stdin();
        stdin.lock().lines().collect::<Result<Vec<_>, _>>()?
    };

    if urls.iter().all(|u| u.trim().is_empty()) {
        bail!("no URL or video ID provided\n\nUsage: ytcap <URL>\n       echo <URL> | ytcap");
    }

    let mut failures = 0usize;
    for url_input in &urls {
        let url_input = url_input.trim();
        if url_input.is_empty() {
            continue;
        }

        let rendered = match session.extract(url_input, lang.clone(), format).await {
            View::Ready(rendered) => rendered,
            View::Failed(message) => {
                eprintln!("{url_input}: {message}");
                failures += 1;
                continue;
            }
            View::Superseded => continue,
        };

        if let Some(ref path) = cli.output {
            std::fs::write(path, &rendered)?;
            if cli.verbose {
                eprintln!("Output written to: {}", path.display());
            }
        } else {
            println!("{rendered}");
        }

        if cli.summarize {
            let summary_format = format.summary_format();
            let input = if summary_format == format {
                rendered
            } else {
                match session.extract(url_input, lang.clone(), summary_format).await {
                    View::Ready(text) => text,
                    View::Failed(message) => {
                        eprintln!("{url_input}: {message}");
                        failures += 1;
                        continue;
                    }
                    View::Superseded => continue,
                }
            };
            match session.summarize(&input).await {
                View::Ready(summary) => println!("\n--- Summary ---\n{summary}"),
                View::Failed(message) => {
                    eprintln!("{url_input}: {message}");
                    failures += 1;
                }
                View::Superseded => {}
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} input(s) failed", urls.iter().filter(|u| !u.trim().is_empty()).count());
    }

    Ok(())
}
