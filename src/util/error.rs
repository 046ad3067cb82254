//! Error types for the progressive tracer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for renderer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Width or height is zero
    #[error("Invalid resolution {width}x{height}: both dimensions must be non-zero")]
    InvalidResolution { width: u32, height: u32 },

    /// Scene collection does not fit its GPU constant block
    #[error("{block} block holds {count} records but capacity is {capacity}")]
    CapacityExceeded {
        block: &'static str,
        count: usize,
        capacity: usize,
    },

    /// Primitive references a material index that does not exist
    #[error("Primitive {primitive} references missing material {material} (materials: {count})")]
    DanglingMaterial {
        primitive: usize,
        material: u32,
        count: usize,
    },

    /// GPU buffer, surface or program allocation failed
    #[error("GPU allocation failed: {0}")]
    Allocation(String),

    /// Program compilation failed or a uniform/binding is missing at draw time
    #[error("GPU program error: {0}")]
    Program(String),

    /// A program was run with no render target bound
    #[error("No render target bound")]
    NoTarget,

    /// Handle does not refer to a live resource
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },

    /// Settings file could not be parsed
    #[error("Invalid settings file {path}: {message}")]
    Settings { path: PathBuf, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an allocation error.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create a program error.
    pub fn program(msg: impl Into<String>) -> Self {
        Self::Program(msg.into())
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidResolution { width: 0, height: 4 };
        assert!(e.to_string().contains("0x4"));

        let e = Error::CapacityExceeded { block: "PrimitiveBlock", count: 101, capacity: 100 };
        assert!(e.to_string().contains("101"));
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("PrimitiveBlock"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
