//! Terminal rendering of background job progress.

use anyhow::{anyhow, Result};
use crossbeam_channel::Receiver;
use keeper_engine::{Job, JobEvent, JobStatus};
use std::io::Write;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Renders progress lines for one job on stderr.
pub struct JobProgress {
    quiet: bool,
    start_time: Instant,
    last_percent: Option<u8>,
}

impl JobProgress {
    pub fn new(quiet: bool) -> Self {
        JobProgress {
            quiet,
            start_time: Instant::now(),
            last_percent: None,
        }
    }

    pub fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    pub fn progress_bar(percent: u8) -> String {
        let percent = percent.min(100) as usize;
        let filled = percent / 5;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
    }

    fn on_update(&mut self, job: &Job) {
        if self.quiet || self.last_percent == Some(job.progress) {
            return;
        }
        self.last_percent = Some(job.progress);
        let label = match job.status {
            JobStatus::Paused => " (paused)",
            _ => "",
        };
        eprint!(
            "\r{}: {}{}",
            job.description,
            Self::progress_bar(job.progress),
            label
        );
        let _ = std::io::stderr().flush();
    }

    fn on_finish(&self, job: &Job) {
        if self.quiet {
            return;
        }
        if self.last_percent.is_some() {
            eprintln!();
        }
        eprintln!(
            "{} {} in {}",
            job.job_type,
            job.status,
            Self::format_duration(self.start_time.elapsed())
        );
    }

    /// Block until the job with `id` reaches a terminal state.
    pub fn wait(&mut self, events: &Receiver<JobEvent>, id: Uuid) -> Result<Job> {
        loop {
            let event = events
                .recv()
                .map_err(|_| anyhow!("job event channel closed before job {} finished", id))?;
            if event.job().id != id {
                continue;
            }
            match event {
                JobEvent::Updated(job) => self.on_update(&job),
                JobEvent::Completed(job) => {
                    self.on_finish(&job);
                    return Ok(job);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(JobProgress::progress_bar(0), "[                    ] 0%");
        assert_eq!(JobProgress::progress_bar(50), "[==========          ] 50%");
        assert_eq!(JobProgress::progress_bar(100), "[====================] 100%");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(JobProgress::format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(JobProgress::format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(JobProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
