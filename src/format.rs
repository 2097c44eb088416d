use serde::{Deserialize, Serialize};

use crate::timestamp::{format_srt_timestamp, format_timestamp};
use crate::{Transcript, TranscriptEntry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `M:SS text` lines
    #[default]
    Text,
    /// Caption text only, no timestamps
    Plain,
    Json,
    Srt,
}

impl OutputFormat {
    /// Rendering sent to the summarizer for output in this format. Prose
    /// formats are reused as-is; structured ones are summarized from the
    /// timestamped lines instead of their markup.
    pub fn summary_format(self) -> OutputFormat {
        match self {
            OutputFormat::Text | OutputFormat::Plain => self,
            OutputFormat::Json | OutputFormat::Srt => OutputFormat::Text,
        }
    }
}

/// One `"<timestamp> <text>"` line
pub fn format_line(entry: &TranscriptEntry) -> String {
    format!("{} {}", format_timestamp(entry.offset_seconds), entry.text)
}

pub fn render(transcript: &Transcript, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => render_text(transcript),
        OutputFormat::Plain => render_plain(transcript),
        OutputFormat::Json => render_json(transcript),
        OutputFormat::Srt => render_srt(transcript),
    }
}

/// Render transcript as timestamped lines
pub fn render_text(transcript: &Transcript) -> String {
    transcript
        .entries
        .iter()
        .map(format_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render transcript text only, space separated
pub fn render_plain(transcript: &Transcript) -> String {
    transcript
        .entries
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_json(transcript: &Transcript) -> String {
    // Transcript holds only strings and floats; serialization cannot fail.
    serde_json::to_string_pretty(transcript).unwrap_or_default()
}

/// Render transcript as SubRip cues. Entries without a duration run until
/// the next entry starts.
pub fn render_srt(transcript: &Transcript) -> String {
    let entries = &transcript.entries;
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let end = if e.duration_seconds > 0.0 {
                e.offset_seconds + e.duration_seconds
            } else {
                entries
                    .get(i + 1)
                    .map(|next| next.offset_seconds)
                    .unwrap_or(e.offset_seconds)
            };
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_srt_timestamp(e.offset_seconds),
                format_srt_timestamp(end),
                e.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
