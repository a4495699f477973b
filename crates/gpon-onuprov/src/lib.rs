//! onuprov - ONU provisioning engine for GPON OLTs
//!
//! Drives the OLT's operator CLI and TL1 interfaces to provision, inspect
//! and remove ONUs, and to migrate batches of unauthorized ONUs.
//!
//! - [`Provisioner`]: per-ONU state machine (stage, classify, apply or roll back)
//!   plus the operator operations
//! - [`MigrationScheduler`]: convergence cycles over a job list
//! - [`parser`]: pure parsers for device output
//! - [`commands`]: CLI and TL1 command builders

mod allocator;
pub mod commands;
mod config;
mod migration;
mod operations;
mod orchestrator;
pub mod parser;
mod tables;
mod types;
pub mod validate;

pub use allocator::{allocate, lowest_free_position};
pub use config::*;
pub use migration::{
    JsonLinesSink, MigrationJob, MigrationOutcome, MigrationReport, MigrationScheduler,
    OutcomeSink,
};
pub use operations::CompatibleModel;
pub use orchestrator::{ProvisionReport, ProvisionState, Provisioner, ProvisioningPath};
pub use parser::UnauthorizedInventory;
pub use tables::*;
pub use types::*;
