//! CSV codec sub-configuration.

use crate::error::{Result, SinkError};
use serde::{Deserialize, Serialize};

/// Binary columns encoded as hex strings.
pub const BINARY_ENCODING_HEX: &str = "hex";
/// Binary columns encoded as base64 strings.
pub const BINARY_ENCODING_BASE64: &str = "base64";

/// Configuration of the csv codec for storage sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CsvConfig {
    /// Delimiter between fields.
    pub delimiter: String,
    /// Quoting character; empty disables quoting.
    pub quote: String,
    /// Representation of NULL values.
    #[serde(rename = "null")]
    pub null_string: String,
    /// Whether to emit the commit ts as an extra column.
    pub include_commit_ts: bool,
    /// Encoding of binary columns, `hex` or `base64`.
    pub binary_encoding_method: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            quote: "\"".to_string(),
            null_string: "\\N".to_string(),
            include_commit_ts: false,
            binary_encoding_method: BINARY_ENCODING_HEX.to_string(),
        }
    }
}

impl CsvConfig {
    pub fn validate_and_adjust(&self) -> Result<()> {
        if self.quote.len() > 1 {
            return Err(SinkError::sink_invalid_config(
                "csv config quote contains more than one character",
            ));
        }
        if let Some(quote) = self.quote.chars().next() {
            if quote == '\r' || quote == '\n' {
                return Err(SinkError::sink_invalid_config(
                    "csv config quote cannot be a line break character",
                ));
            }
        }

        if self.delimiter.is_empty() {
            return Err(SinkError::sink_invalid_config(
                "csv config delimiter cannot be empty",
            ));
        }
        if self.delimiter.contains('\r') || self.delimiter.contains('\n') {
            return Err(SinkError::sink_invalid_config(
                "csv config delimiter contains line break characters",
            ));
        }
        if !self.quote.is_empty() && self.delimiter.contains(&self.quote) {
            return Err(SinkError::sink_invalid_config(
                "csv config quote and delimiter cannot be the same",
            ));
        }

        match self.binary_encoding_method.as_str() {
            BINARY_ENCODING_HEX | BINARY_ENCODING_BASE64 => Ok(()),
            _ => Err(SinkError::sink_invalid_config(
                "csv config binary-encoding-method can only be hex or base64",
            )),
        }
    }
}
