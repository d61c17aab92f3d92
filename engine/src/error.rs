//! Error types for the Loft engine.
//!
//! The engine is deliberately hard to fail: predicate evaluation and
//! mutation collapse are total. Only version parsing can error, and
//! inside predicate evaluation even that degrades to a non-match.

use thiserror::Error;

/// All possible errors from the Loft engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid version string: {0}")]
    InvalidVersion(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
