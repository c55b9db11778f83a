//! Error types for the table sink and its configuration surface.
//!
//! Configuration errors are reported to the caller and the sink is simply not
//! created. Runtime backend errors are wrapped in [`SinkError::Internal`] and
//! returned without tearing the sink down; the scheduler decides what to do.

use thiserror::Error;

/// Errors surfaced by sink configuration validation and the table sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Malformed sink URI, or a scheme/protocol mismatch.
    #[error("invalid sink URI: {0}")]
    SinkUriInvalid(String),

    /// Field-level configuration validation failure.
    #[error("invalid sink config: {0}")]
    SinkInvalidConfig(String),

    /// The sink URI and the configuration file disagree on a shared parameter.
    #[error("incompatible configuration in sink uri({in_uri}) and config file({in_file})")]
    IncompatibleSinkConfig {
        /// The conflicting `key=value` pairs as supplied by the sink URI.
        in_uri: String,
        /// The conflicting `key=value` pairs as supplied by the config file.
        in_file: String,
    },

    /// Cross-field rule violation in the replica configuration.
    #[error("invalid replica config: {0}")]
    InvalidReplicaConfig(String),

    /// Unknown `date-separator` value for a storage sink.
    #[error("invalid date separator {0}, must be one of none, year, month, day")]
    StorageSinkInvalidDateSeparator(String),

    /// A backend sink reported an error while accepting a batch.
    #[error("table sink internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SinkError {
    /// Create a new sink-URI error
    pub fn sink_uri_invalid(msg: impl Into<String>) -> Self {
        Self::SinkUriInvalid(msg.into())
    }

    /// Create a new field-level config error
    pub fn sink_invalid_config(msg: impl Into<String>) -> Self {
        Self::SinkInvalidConfig(msg.into())
    }

    /// Create a new cross-field replica-config error
    pub fn invalid_replica_config(msg: impl Into<String>) -> Self {
        Self::InvalidReplicaConfig(msg.into())
    }

    /// Wrap a backend error
    pub fn internal(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }

    /// Check whether this is a URI/config parameter conflict.
    ///
    /// Callers use this to distinguish "the user moved a parameter between
    /// the URI and the config file" from genuine validation failures.
    pub fn is_incompatible_sink_config(&self) -> bool {
        matches!(self, Self::IncompatibleSinkConfig { .. })
    }

    /// Check whether this error came from the backend sink.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Result type for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;
