//! Spinners for downloads running in the scheduler

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mediadl_types::{CoreEvent, DownloadStatus};
use std::collections::HashMap;
use std::time::Duration;

/// One spinner per download, driven by core events
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    titles: HashMap<String, String>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            titles: HashMap::new(),
        }
    }

    /// Remember the display name of a download
    pub fn set_title(&mut self, key: &str, title: &str) {
        self.titles.insert(key.to_string(), title.to_string());
    }

    fn title(&self, key: &str) -> String {
        self.titles
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn start(&mut self, key: &str) -> ProgressBar {
        if let Some(pb) = self.bars.get(key) {
            return pb.clone();
        }

        let pb = self.multi.add(ProgressBar::new_spinner());
        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(spinner);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(self.title(key));

        self.bars.insert(key.to_string(), pb.clone());
        pb
    }

    /// Update spinners from an event
    pub fn handle_event(&mut self, event: &CoreEvent) {
        match event {
            CoreEvent::DownloadAdded { key, title } => {
                if let Some(title) = title {
                    self.set_title(key, title);
                }
            }

            CoreEvent::DownloadStatusChanged { key, status } => match status {
                DownloadStatus::Downloading => {
                    self.start(key);
                }
                DownloadStatus::Complete => {
                    if let Some(pb) = self.bars.remove(key) {
                        pb.finish_with_message(format!(
                            "{} {}",
                            style("✓").green().bold(),
                            self.title(key)
                        ));
                    }
                }
                DownloadStatus::Failed => {
                    if let Some(pb) = self.bars.remove(key) {
                        pb.abandon_with_message(format!(
                            "{} {} failed",
                            style("✗").red().bold(),
                            self.title(key)
                        ));
                    }
                }
                _ => {}
            },

            CoreEvent::Alert(alert) => {
                let _ = self
                    .multi
                    .println(format!("{} {}", style("!").yellow().bold(), alert.message()));
            }

            CoreEvent::DownloadRemoved { key } => {
                if let Some(pb) = self.bars.remove(key) {
                    pb.finish_and_clear();
                }
            }
        }
    }

    /// Clear all spinners
    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}
