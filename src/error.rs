//! Error types for the sandbox pool.
//!
//! One enum covers every subsystem in this crate: configuration, the state
//! machine, the container driver, and the pool manager.

use thiserror::Error;

use crate::state::SandboxState;

/// Errors produced anywhere in the sandbox pool.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("pool exhausted: {0} sandboxes already in use")]
    PoolExhausted(usize),

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("sandbox operation '{operation}' timed out after {timeout_ms}ms")]
    SandboxTimeout { operation: String, timeout_ms: u64 },

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SandboxState,
        to: SandboxState,
    },

    #[error("python environment setup failed: {0}")]
    PythonSetupFailed(String),

    #[error("unsafe path '{0}': must match [A-Za-z0-9/_.-]+")]
    UnsafePath(String),

    #[error("sandbox '{0}' not found")]
    NotFound(String),

    #[error("container engine error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
