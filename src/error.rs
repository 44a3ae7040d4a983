//! Error types shared by every module of the crate.

use thiserror::Error;

use crate::dtype::DataType;

/// Errors raised while building, running or persisting blocks.
#[derive(Debug, Error)]
pub enum Error {
    /// Declared and observed shapes disagree.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Shape the receiver expected.
        expected: String,
        /// Shape that was supplied.
        actual: String,
    },

    /// Declared and observed data types disagree.
    #[error("data type mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DataTypeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Data type the receiver expected.
        expected: DataType,
        /// Data type that was supplied.
        actual: DataType,
    },

    /// The operation needs materialized values that do not exist yet.
    #[error("uninitialized: {0}")]
    Uninitialized(String),

    /// A parameter stream is truncated or corrupt.
    #[error("malformed parameter stream: {0}")]
    SerializationFormat(String),

    /// A stream uses an encoding this crate cannot read.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A caller supplied an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The array engine rejected a shape.
    #[error("array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A safetensors file could not be read.
    #[error("safetensors error: {0}")]
    SafeTensors(String),
}

impl Error {
    /// Creates a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Creates a data type mismatch error.
    #[must_use]
    pub fn data_type_mismatch(
        context: impl Into<String>,
        expected: DataType,
        actual: DataType,
    ) -> Self {
        Self::DataTypeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Creates an uninitialized-state error.
    #[must_use]
    pub fn uninitialized(what: impl Into<String>) -> Self {
        Self::Uninitialized(what.into())
    }

    /// Creates a serialization format error.
    #[must_use]
    pub fn format(reason: impl Into<String>) -> Self {
        Self::SerializationFormat(reason.into())
    }

    /// Creates an unsupported format error.
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat(reason.into())
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

/// Result type for crate operations.
pub type Result<T> = std::result::Result<T, Error>;
