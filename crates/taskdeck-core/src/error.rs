//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TaskDeck.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown status string.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}
