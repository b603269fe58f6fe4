//! Terminal output for the CLI: spinners while waiting, coloured summaries.
//!
//! Uses `indicatif` for the spinner and `console` for styling.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::JobInfo;
use crate::cache::ArtifactFile;
use crate::error::SimError;
use crate::poller::StatusEvent;
use crate::state_machine::{JobHandle, JobStatus};

/// Spinner that follows one job through its status changes.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{job_id}: waiting for status"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn message(&self, message: impl Into<String>) {
        self.pb.set_message(message.into());
    }

    /// Prints the change above the spinner and updates its message.
    pub fn status_changed(&self, event: &StatusEvent) {
        let style = self.style_for(event.to);
        let line = match event.from {
            Some(from) => format!("{from} -> {}", style.apply_to(event.to)),
            None => format!("{}", style.apply_to(event.to)),
        };
        self.pb.println(format!("  {}  {line}", event.observed_at.format("%H:%M:%S")));
        if let Some(message) = &event.message {
            self.pb.println(format!("    {message}"));
        }
        self.pb.set_message(format!("{}: {}", event.job_id, event.to));
    }

    pub fn complete(&self, handle: &JobHandle) {
        self.pb.finish_and_clear();
        match handle.status() {
            JobStatus::Success => {
                println!("  {} Job {} completed", self.green.apply_to("✓"), handle.job_id);
            }
            status => {
                let detail = handle.diagnostic().unwrap_or("no diagnostic");
                println!(
                    "  {} Job {} ended {status}: {detail}",
                    self.red.apply_to("✗"),
                    handle.job_id
                );
            }
        }
    }

    pub fn downloaded(&self, file: &ArtifactFile) {
        self.pb.finish_and_clear();
        let origin = if file.from_cache { "cached" } else { "downloaded" };
        println!(
            "  {} {} ({origin}, {} bytes, sha256 {})",
            self.green.apply_to("✓"),
            file.path.display(),
            file.size,
            file.content_hash
        );
    }

    pub fn failed(&self, error: &SimError) {
        self.pb.finish_and_clear();
        eprintln!("  {} {error}", self.red.apply_to("✗"));
    }

    fn style_for(&self, status: JobStatus) -> &Style {
        match status {
            JobStatus::Success => &self.green,
            JobStatus::Error | JobStatus::Cancelled => &self.red,
            _ => &self.yellow,
        }
    }
}

/// One line per job for `list`.
pub fn job_row(job: &JobHandle) -> String {
    format!(
        "{:<24} {:<16} {:<10} {:<12} {}",
        job.job_id,
        job.status().to_string(),
        job.task_type.to_string(),
        job.created_at.format("%Y-%m-%d %H:%M"),
        job.name
    )
}

pub fn print_info(info: &JobInfo) {
    println!("{}", serde_json::to_string_pretty(info).unwrap_or_default());
}
