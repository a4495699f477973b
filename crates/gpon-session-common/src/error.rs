//! Error types for OLT session and provisioning operations.
//!
//! Errors are raised at the layer that detects them and carried upward
//! unchanged; only the provisioning boundary turns them into job outcomes.

use gpon_orch_common::Retryable;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for OLT operations.
pub type OltResult<T> = Result<T, OltError>;

/// Errors that can occur while talking to or provisioning an OLT.
#[derive(Debug, Error)]
pub enum OltError {
    /// Login did not reach an authenticated prompt.
    #[error("Connection to {host} failed: {reason}")]
    Connection {
        /// Host that was being contacted.
        host: String,
        /// What went wrong during the handshake.
        reason: String,
    },

    /// The ssh client process could not be started.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// None of the expected patterns appeared in time.
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    ProtocolTimeout {
        /// Labels of the patterns that were being waited on.
        waiting_for: String,
        timeout: Duration,
    },

    /// The device closed the stream.
    #[error("Session closed while waiting for {waiting_for}")]
    EndOfStream { waiting_for: String },

    /// The device answered with its failure marker.
    #[error("Command rejected: '{command}': {response}")]
    CommandRejected {
        /// Command as logged (secrets masked).
        command: String,
        /// Device reply from the failure marker to the end of its line.
        response: String,
    },

    /// Device output did not have the expected shape.
    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// The detected model has no provisioning recipe.
    #[error("Model '{model}' is not supported for provisioning")]
    ModelIncompatible { model: String },

    /// Every position on the port is taken.
    #[error("No free position on PON {port} (capacity {capacity})")]
    PositionExhausted { port: String, capacity: u16 },

    /// Operator input failed validation before any device interaction.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// A looked-up entity does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl OltError {
    /// Creates a connection error.
    pub fn connection(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Creates a protocol timeout error.
    pub fn timeout(waiting_for: impl Into<String>, timeout: Duration) -> Self {
        Self::ProtocolTimeout {
            waiting_for: waiting_for.into(),
            timeout,
        }
    }

    /// Creates a command rejected error.
    pub fn rejected(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self::CommandRejected {
            command: command.into(),
            response: response.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OltError::Connection { .. }
                | OltError::Spawn { .. }
                | OltError::ProtocolTimeout { .. }
                | OltError::EndOfStream { .. }
                | OltError::Io(_)
        )
    }

    /// Returns true if the session itself is gone or never came up.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            OltError::Connection { .. }
                | OltError::Spawn { .. }
                | OltError::EndOfStream { .. }
        )
    }
}

impl Retryable for OltError {
    fn is_retryable(&self) -> bool {
        OltError::is_retryable(self)
    }
}
