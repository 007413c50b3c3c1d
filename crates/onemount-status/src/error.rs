//! Error types for status derivation

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
