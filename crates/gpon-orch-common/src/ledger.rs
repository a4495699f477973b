//! Per-key job bookkeeping for batch runs.
//!
//! A ledger holds every job of a batch in submission order. Jobs start
//! pending and move to exactly one terminal status; a second terminal
//! transition is refused, so each key yields at most one outcome.

use crate::task::{JobCounts, JobStatus};
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Job {key} is not tracked")]
    Unknown { key: String },

    #[error("Job {key} already resolved as {status}")]
    AlreadyResolved { key: String, status: JobStatus },

    #[error("Job {key} cannot be moved back to pending")]
    NotTerminal { key: String },
}

#[derive(Debug, Clone)]
pub struct JobLedger<K> {
    order: Vec<K>,
    status: HashMap<K, JobStatus>,
}

impl<K> Default for JobLedger<K> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            status: HashMap::new(),
        }
    }
}

impl<K> JobLedger<K>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a key as pending. Returns false for duplicates.
    pub fn track(&mut self, key: K) -> bool {
        if self.status.contains_key(&key) {
            return false;
        }
        self.status.insert(key.clone(), JobStatus::Pending);
        self.order.push(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn status(&self, key: &K) -> Option<JobStatus> {
        self.status.get(key).copied()
    }

    /// Pending keys, in submission order.
    pub fn pending(&self) -> Vec<K> {
        self.order
            .iter()
            .filter(|key| self.status.get(*key) == Some(&JobStatus::Pending))
            .cloned()
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.status.values().any(|status| !status.is_terminal())
    }

    /// Records the terminal status of a pending job.
    pub fn resolve(&mut self, key: &K, status: JobStatus) -> Result<(), LedgerError> {
        if !status.is_terminal() {
            return Err(LedgerError::NotTerminal {
                key: key.to_string(),
            });
        }
        let current = self.status.get_mut(key).ok_or_else(|| LedgerError::Unknown {
            key: key.to_string(),
        })?;
        if current.is_terminal() {
            return Err(LedgerError::AlreadyResolved {
                key: key.to_string(),
                status: *current,
            });
        }
        *current = status;
        Ok(())
    }

    /// Resolves every remaining pending job with `status` and returns their keys.
    pub fn resolve_remaining(&mut self, status: JobStatus) -> Vec<K> {
        let remaining = self.pending();
        for key in &remaining {
            if let Some(current) = self.status.get_mut(key) {
                *current = status;
            }
        }
        remaining
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for status in self.status.values() {
            counts.add(*status);
        }
        counts
    }
}
