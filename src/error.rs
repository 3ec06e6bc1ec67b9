//! Error types for the ratewindow engine.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for ratewindow operations.
///
/// A rejected request is not an error; it is reported through a
/// [`Verdict`](crate::ratelimit::Verdict).
#[derive(Error, Debug)]
pub enum RateWindowError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy with a zero limit or a zero-length window
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// No rule is configured for the requested route
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ratewindow operations.
pub type Result<T> = std::result::Result<T, RateWindowError>;
