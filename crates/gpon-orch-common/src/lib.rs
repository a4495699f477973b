//! Shared orchestration primitives for GPON provisioning.
//!
//! - [`RetryPolicy`]: bounded exponential backoff around fallible async work
//! - [`Retryable`]: classification hook errors implement to opt into retries
//! - [`JobLedger`]: per-key job bookkeeping that admits exactly one terminal outcome
//! - [`JobStatus`]: lifecycle of a batch job

mod ledger;
mod retry;
mod task;

pub use ledger::{JobLedger, LedgerError};
pub use retry::{RetryPolicy, Retryable};
pub use task::{JobCounts, JobStatus};
