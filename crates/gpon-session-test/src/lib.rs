//! Test support for GPON provisioning
//!
//! A simulated OLT that answers both the operator CLI and TL1 over an
//! in-memory transport, job fixtures, and assertions over what the device
//! received.

pub mod fixtures;
pub mod simulated;
pub mod verification;

pub use fixtures::*;
pub use simulated::*;
pub use verification::*;
