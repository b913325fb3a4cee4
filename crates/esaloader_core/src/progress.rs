//! Run progress for `download_all`.
//!
//! Status lines go to stdout as the page loop advances, so a dry-run listing
//! survives a later failure or an interrupt. `--json` runs use `NoProgress`
//! and keep stdout for the report.

use std::io::{self, Write};

use crate::download::ListedItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { query: Option<String> },
    Found { total_count: u64, dry_run: bool },
    Listed(ListedItem),
    LimitReached { limit: usize },
}

pub trait ProgressReporter {
    fn report(&mut self, event: DownloadEvent);
}

pub struct StdoutProgress;

impl ProgressReporter for StdoutProgress {
    fn report(&mut self, event: DownloadEvent) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(render_event(&event).as_bytes());
        let _ = stdout.flush();
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _event: DownloadEvent) {}
}

/// Console text for one event, trailing newline included.
pub fn render_event(event: &DownloadEvent) -> String {
    match event {
        DownloadEvent::Started { query: Some(query) } => {
            format!("Fetching posts with query: {query}...\n")
        }
        DownloadEvent::Started { query: None } => "Fetching posts...\n".to_string(),
        DownloadEvent::Found {
            total_count,
            dry_run,
        } => {
            let mut output = format!("Found {total_count} posts\n");
            if *dry_run {
                output.push_str("\nDry run mode - listing posts without downloading:\n");
                output.push_str(&"-".repeat(60));
                output.push('\n');
            }
            output
        }
        DownloadEvent::Listed(item) => {
            let mut output = format!("[{}] {}\n", item.number, item.name);
            if let Some(category) = &item.category {
                output.push_str(&format!("    Category: {category}\n"));
            }
            if !item.tags.is_empty() {
                output.push_str(&format!("    Tags: {}\n", item.tags.join(", ")));
            }
            output
        }
        DownloadEvent::LimitReached { limit } => format!("\nReached limit of {limit} posts\n"),
    }
}
