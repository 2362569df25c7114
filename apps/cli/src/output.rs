//! Output formatting utilities

use crate::OutputFormat;
use console::{style, StyledObject};
use mediadl_types::DownloadStatus;
use serde::Serialize;

/// Print a value as JSON, or run `human` for the other formats
pub fn print_output<T: Serialize>(
    value: &T,
    format: OutputFormat,
    human: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human | OutputFormat::Table => human(value),
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

pub fn status_icon(status: DownloadStatus) -> StyledObject<&'static str> {
    match status {
        DownloadStatus::Complete => style("✓").green(),
        DownloadStatus::Downloading => style("↓").cyan(),
        DownloadStatus::Failed => style("✗").red(),
        DownloadStatus::Missing => style("?").yellow(),
        DownloadStatus::Pending => style("·").dim(),
    }
}

/// Shorten `text` to at most `max` characters
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
