//! Custom error types for the gateway.
//!
//! This module defines the primary error type, `GatewayError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the few failure modes that are allowed to surface as values instead of integer
//! result codes.
//!
//! ## Error Hierarchy
//!
//! - **`Busy`**: the orchestrator lock is held by another operation. A boundary layer
//!   maps it to a "service unavailable" response (see [`GatewayError::is_busy`]).
//! - **Validation** (`InvalidProfile`, `IncompatibleFirmware`, `InvalidUser`,
//!   `InvalidFirmware`): rejected experiment inputs.
//! - **Setup defects** (`Config`, `Configuration`, `UnknownRadioMode`, `InvalidNodeId`,
//!   `UnknownNodeType`): programming or configuration mistakes detected early.
//! - **Process lifecycle** (`AlreadyRunning`, `StartTimeout`, `Spawn`, `Signal`,
//!   `ThreadPanicked`): raised by the process supervisor.
//!
//! Transport failures on the control node link have their own enum,
//! [`TransportError`], because they are the "Absent" answer of a command and are
//! folded into integer failure codes by the protocol layer rather than propagated.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type AppResult<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid profile JSON: {0}")]
    ProfileJson(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Gateway busy: cannot {0} while another operation is in progress")]
    Busy(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid user name '{0}'")]
    InvalidUser(String),

    #[error("Firmware '{0}' is not compatible with the open node")]
    IncompatibleFirmware(String),

    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    #[error("Unknown radio mode: '{0}'")]
    UnknownRadioMode(String),

    #[error("Invalid node id '{0}': expected '<arch>-<num>[-suffix]'")]
    InvalidNodeId(String),

    #[error("Unknown {kind} node type '{name}', expected one of: {known}")]
    UnknownNodeType {
        kind: &'static str,
        name: String,
        known: String,
    },

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("{name} did not launch within {timeout:?}")]
    StartTimeout { name: String, timeout: Duration },

    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send {signal:?} to pid {pid}: {source}")]
    Signal {
        pid: i32,
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("{0} thread panicked")]
    ThreadPanicked(String),
}

impl GatewayError {
    /// True when the error reports lock contention rather than a failure.
    pub fn is_busy(&self) -> bool {
        matches!(self, GatewayError::Busy(_))
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::Config(Box::new(err))
    }
}

/// Why a command sent to the control node produced no answer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Control node answer timeout after {0:?}")]
    Timeout(Duration),

    #[error("Control node stdin unavailable (process not started or already stopped)")]
    Closed,

    #[error("Control node process is terminated: {0}")]
    Io(#[from] std::io::Error),
}
