//! Background job model.
//!
//! This module defines:
//! - JobType: the four kinds of bulk operation
//! - JobStatus: the per-job state machine
//! - Job: an in-memory snapshot handed to observers and callers
//!
//! Jobs are never persisted.

use crate::error::Result;
use crate::relink::RelinkOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    VerifyAll,
    PinCopy,
    Restore,
    RelinkScan,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::VerifyAll => "VERIFY_ALL",
            JobType::PinCopy => "PIN_COPY",
            JobType::Restore => "RESTORE",
            JobType::RelinkScan => "RELINK_SCAN",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle.
///
/// `Queued -> Running -> {Paused <-> Running} -> {Completed | Failed | Canceled}`.
/// A job with no handler goes straight from `Queued` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Running) | (Queued, Failed) => true,
            (Running, Paused) | (Running, Completed) | (Running, Failed) | (Running, Canceled) => {
                true
            }
            // A handler that never reaches a checkpoint can finish while paused.
            (Paused, Running) | (Paused, Completed) | (Paused, Failed) | (Paused, Canceled) => {
                true
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,

    /// Short human-readable label
    pub description: String,

    pub status: JobStatus,

    /// 0 to 100
    pub progress: u8,

    /// Set when the job fails
    pub error: Option<String>,

    /// Handler inputs
    pub payload: Value,

    /// Handler output summary, set on completion
    pub result: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, description: impl Into<String>, payload: Value) -> Self {
        Job {
            id: Uuid::new_v4(),
            job_type,
            description: description.into(),
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            payload,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn verify_all() -> Self {
        Job::new(JobType::VerifyAll, "Verify all files", json!({}))
    }

    pub fn pin_copy(file_id: &str, version_number: i64) -> Self {
        Job::new(
            JobType::PinCopy,
            format!("Pin version {}", version_number),
            json!({ "file_id": file_id, "version_number": version_number }),
        )
    }

    pub fn restore(file_id: &str, version_number: i64) -> Self {
        Job::new(
            JobType::Restore,
            format!("Restore version {}", version_number),
            json!({ "file_id": file_id, "version_number": version_number }),
        )
    }

    pub fn relink_scan(options: &RelinkOptions) -> Result<Self> {
        Ok(Job::new(
            JobType::RelinkScan,
            format!("Relink scan of {}", options.root_path.display()),
            serde_json::to_value(options)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Canceled));
        for terminal in [Completed, Failed, Canceled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Running, Paused, Completed, Failed, Canceled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Running.can_transition_to(Queued));
    }

    #[test]
    fn test_constructors_carry_payload() {
        let job = Job::pin_copy("abc", 3);
        assert_eq!(job.job_type, JobType::PinCopy);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.payload["file_id"], "abc");
        assert_eq!(job.payload["version_number"], 3);

        let job = Job::relink_scan(&RelinkOptions::new("/mnt/photos")).unwrap();
        assert_eq!(job.payload["root_path"], "/mnt/photos");
        assert_eq!(job.payload["use_hash"], false);
        assert_eq!(serde_json::to_string(&job.job_type).unwrap(), "\"RELINK_SCAN\"");
    }
}
