//! Custom error types for the console.
//!
//! This module defines the primary error type, `ConsoleError`, for the whole crate. Using the
//! `thiserror` crate, it gives the live-acquisition core a structured way to report failures
//! to the presentation layer instead of letting them escape unhandled.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML parse or type errors.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine (e.g. a zero
//!   poll interval). Caught by `ConsoleConfig::validate`.
//! - **`Hardware`**: A device rejected a command or a read. Carries the device name and the
//!   operation so the operator can tell which call failed. Capability traits report failures
//!   with `anyhow`, and the core wraps them here with context.
//! - **`PropertyWrite`**: The property bridge could not write an attribute.
//! - **`SessionActive` / `NoActiveSession`**: State machine guards of the live session
//!   controller.
//! - **`ControlCoolingDown`**: A control was activated while disabled by its cooldown.
//! - **`ShutdownFailed`**: One or more teardown steps failed. Teardown always runs every step
//!   and reports every failure.

use thiserror::Error;

/// Convenience alias for results using the console error type.
pub type AppResult<T> = std::result::Result<T, ConsoleError>;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Hardware error on '{device}' during {operation}: {source}")]
    Hardware {
        device: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write property '{property}' on '{device}': {source}")]
    PropertyWrite {
        device: String,
        property: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    #[error("Device '{device}' has no editable property '{property}'")]
    UnknownProperty { device: String, property: String },

    #[error("Camera '{0}' already has an active live session")]
    SessionActive(String),

    #[error("Camera '{0}' has no active live session")]
    NoActiveSession(String),

    #[error("Camera '{0}' is still starting its live session")]
    SessionStarting(String),

    #[error("Control '{0}' is disabled while cooling down")]
    ControlCoolingDown(String),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Shutdown failed with errors: {}", join_errors(.0))]
    ShutdownFailed(Vec<ConsoleError>),
}

fn join_errors(errors: &[ConsoleError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConsoleError {
    /// Wrap a capability failure with the device and operation it came from.
    pub fn hardware(
        device: impl Into<String>,
        operation: &'static str,
        source: anyhow::Error,
    ) -> Self {
        ConsoleError::Hardware {
            device: device.into(),
            operation,
            source,
        }
    }

    /// Whether the console can keep running after this error.
    ///
    /// Hardware and property failures end the current operation but leave the console usable.
    /// Configuration problems and a closed event channel do not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ConsoleError::Config(_)
            | ConsoleError::Configuration(_)
            | ConsoleError::ChannelClosed => false,
            ConsoleError::ShutdownFailed(errors) => errors.iter().all(Self::is_recoverable),
            _ => true,
        }
    }
}

impl From<figment::Error> for ConsoleError {
    fn from(value: figment::Error) -> Self {
        ConsoleError::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for ConsoleError {
    fn from(value: tokio::task::JoinError) -> Self {
        ConsoleError::TaskFailed(value.to_string())
    }
}
