//! Batch job status types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single job in a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet resolved
    Pending,
    /// Completed successfully
    Migrated,
    /// Attempted and failed
    Error,
    /// Never observed on the device
    NotFound,
}

impl JobStatus {
    /// Returns the wire/report name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Migrated => "migrated",
            JobStatus::Error => "error",
            JobStatus::NotFound => "not_found",
        }
    }

    /// Returns true once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    /// Returns true if the job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Migrated)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tally of job statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub migrated: usize,
    pub error: usize,
    pub not_found: usize,
}

impl JobCounts {
    /// Adds one job with the given status.
    pub fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Migrated => self.migrated += 1,
            JobStatus::Error => self.error += 1,
            JobStatus::NotFound => self.not_found += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.migrated + self.error + self.not_found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_classification() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Migrated.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::NotFound.is_terminal());

        assert!(JobStatus::Migrated.is_success());
        assert!(!JobStatus::NotFound.is_success());
    }

    #[test]
    fn test_job_status_names() {
        assert_eq!(JobStatus::NotFound.as_str(), "not_found");
        assert_eq!(JobStatus::Migrated.to_string(), "migrated");
    }

    #[test]
    fn test_job_counts() {
        let mut counts = JobCounts::default();
        counts.add(JobStatus::Migrated);
        counts.add(JobStatus::Migrated);
        counts.add(JobStatus::NotFound);
        assert_eq!(counts.migrated, 2);
        assert_eq!(counts.not_found, 1);
        assert_eq!(counts.total(), 3);
    }
}
