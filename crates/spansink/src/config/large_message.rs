//! Large-message handling sub-configuration.
//!
//! Oversized messages can be shrunk to their handle-key columns or offloaded
//! to a claim-check storage, sending only a reference downstream. Only some
//! protocols can represent either transformation.

use super::protocol::Protocol;
use crate::error::{Result, SinkError};
use serde::{Deserialize, Serialize};

/// Compression of claim-check payloads: snappy.
pub const COMPRESSION_SNAPPY: &str = "snappy";
/// Compression of claim-check payloads: lz4.
pub const COMPRESSION_LZ4: &str = "lz4";

/// How to handle messages exceeding the broker limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LargeMessageHandleOption {
    /// Do nothing; oversized messages fail at the broker.
    #[default]
    None,
    /// Offload the payload to claim-check storage and send a reference.
    ClaimCheck,
    /// Send only the handle-key columns.
    HandleKeyOnly,
}

/// Configuration for handling large messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LargeMessageHandleConfig {
    pub large_message_handle_option: LargeMessageHandleOption,
    pub claim_check_storage_uri: String,
    pub claim_check_compression: String,
}

impl LargeMessageHandleConfig {
    /// Whether large-message handling is disabled.
    pub fn disabled(&self) -> bool {
        self.large_message_handle_option == LargeMessageHandleOption::None
    }

    /// Whether oversized messages are shrunk to handle-key columns.
    pub fn handle_key_only(&self) -> bool {
        self.large_message_handle_option == LargeMessageHandleOption::HandleKeyOnly
    }

    /// Whether oversized messages are offloaded to claim-check storage.
    pub fn enable_claim_check(&self) -> bool {
        self.large_message_handle_option == LargeMessageHandleOption::ClaimCheck
    }

    /// Validate against the effective protocol.
    ///
    /// The open protocol supports every option; canal-json requires the
    /// extension fields to carry the handle, and no other protocol can
    /// represent either transformation.
    pub fn validate(&self, protocol: Protocol, enable_tidb_extension: bool) -> Result<()> {
        if self.disabled() {
            return Ok(());
        }

        match protocol {
            Protocol::Open => {}
            Protocol::CanalJson => {
                if !enable_tidb_extension {
                    return Err(SinkError::invalid_replica_config(format!(
                        "large-message-handle is set to {:?}, protocol is {}, but enable-tidb-extension is false",
                        self.large_message_handle_option, protocol
                    )));
                }
            }
            _ => {
                return Err(SinkError::invalid_replica_config(format!(
                    "large-message-handle is set to {:?}, protocol {} does not support it",
                    self.large_message_handle_option, protocol
                )));
            }
        }

        if self.enable_claim_check() {
            if self.claim_check_storage_uri.is_empty() {
                return Err(SinkError::invalid_replica_config(
                    "large-message-handle is set to claim-check, but claim-check-storage-uri is empty",
                ));
            }
            if !self.claim_check_compression.is_empty() {
                match self.claim_check_compression.to_lowercase().as_str() {
                    COMPRESSION_SNAPPY | COMPRESSION_LZ4 => {}
                    other => {
                        return Err(SinkError::invalid_replica_config(format!(
                            "claim-check-compression supports snappy and lz4, got {other}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
