//! Custom error types for the qualification sequencer.
//!
//! `QcError` consolidates the few error sources the core can actually hit.
//! Protocol violations, sub-test timeouts and session invariant violations
//! are deliberately *not* errors: they are handled in place (logged and
//! discarded, or recovered by the session manager) so the process keeps
//! running and keeps accepting the next robot. What remains is:
//!
//! - **`Config`**: file or environment problems surfaced by `figment`.
//! - **`Configuration`**: semantic errors that pass parsing but are logically
//!   invalid (e.g. a zero tick rate), caught by the validation step.
//! - **`Io`** / **`Csv`**: result persistence failures.
//!
//! With `#[from]`, `QcError` is built seamlessly from the underlying error
//! types via the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the sequencer error type.
pub type QcResult<T> = std::result::Result<T, QcError>;

/// Primary error type for the qualification sequencer.
#[derive(Error, Debug)]
pub enum QcError {
    /// Configuration loading error (file parsing, env extraction).
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Semantic configuration error caught during validation.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// I/O error, typically while persisting results.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error while writing a verdict row.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for QcError {
    fn from(e: figment::Error) -> Self {
        QcError::Config(Box::new(e))
    }
}
