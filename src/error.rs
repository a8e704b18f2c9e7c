//! Error types for the Gatekeeper engine.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// Policy outcomes (quota exceeded, bot verdicts, failed challenges) are
/// ordinary return values, not errors. These variants cover infrastructure
/// and configuration failures only; every public engine operation catches
/// them at its boundary and fails open.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors (unreachable backend, malformed payloads)
    #[error("Counter store error: {0}")]
    Store(String),

    /// Rule store errors
    #[error("Rule store error: {0}")]
    Rules(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
