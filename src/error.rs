//! Custom error types for the crate.
//!
//! This module defines the primary error type, `FramerError`, used by every strict
//! API in the crate. Most of the streaming pipeline never surfaces errors at all:
//! incomplete data is retried on the next delivery, integrity failures and overflow
//! are recorded in statistics, and script failures become structured results. What
//! remains is reported here.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches while extracting [`crate::config::Settings`].
//! - **`Configuration`**: Semantic errors in a configuration that parsed correctly,
//!   such as a zero-sized buffer or a start-only reader without a start sequence.
//! - **`Io`**: Wraps `std::io::Error` for file and stdin access in the CLI.
//! - **`UnsupportedChecksum`**: An algorithm name passed to a strict checksum API
//!   that does not map to any known algorithm.
//! - **`UnsupportedDecoder`**: A decoder method name that cannot be parsed.
//! - **`Script`**: Wraps [`ScriptError`] for callers that load or validate scripts
//!   through the strict API.

use crate::scripting::ScriptError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, FramerError>;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum FramerError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checksum algorithm name not recognised.
    #[error("Unsupported checksum algorithm: '{0}'")]
    UnsupportedChecksum(String),

    /// Decoder method name not recognised.
    #[error("Unsupported decoder method: '{0}'")]
    UnsupportedDecoder(String),

    /// Script could not be loaded, validated or executed.
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

impl From<figment::Error> for FramerError {
    fn from(err: figment::Error) -> Self {
        FramerError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_checksum_message_names_algorithm() {
        let err = FramerError::UnsupportedChecksum("CRC-64".to_string());
        assert_eq!(err.to_string(), "Unsupported checksum algorithm: 'CRC-64'");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FramerError = io.into();
        assert!(matches!(err, FramerError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_script_error_conversion() {
        let err: FramerError = ScriptError::MissingParseFunction.into();
        assert!(matches!(err, FramerError::Script(_)));
        assert!(err.to_string().starts_with("Script error:"));
    }
}
