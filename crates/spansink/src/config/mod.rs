//! Sink configuration model, validation, and URI reconciliation.
//!
//! A changefeed's sink is described twice: by a declarative configuration
//! record and by the sink URI. Some parameters may appear in both places;
//! the URI wins, and a genuine disagreement is surfaced as
//! [`SinkError::IncompatibleSinkConfig`] so a live reconfiguration can be
//! rejected before it takes effect.

mod csv;
mod large_message;
mod protocol;
pub mod scheme;

pub use csv::{CsvConfig, BINARY_ENCODING_BASE64, BINARY_ENCODING_HEX};
pub use large_message::{
    LargeMessageHandleConfig, LargeMessageHandleOption, COMPRESSION_LZ4, COMPRESSION_SNAPPY,
};
pub use protocol::{DateSeparator, Protocol};

use crate::error::{Result, SinkError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};
use url::Url;

/// Query key of the transaction atomicity level in the sink URI.
pub const TXN_ATOMICITY_KEY: &str = "transaction-atomicity";
/// Query key of the protocol in the sink URI.
pub const PROTOCOL_KEY: &str = "protocol";

/// Default line terminator for record-oriented encodings.
pub const CRLF: &str = "\r\n";

/// Minimum width of the storage file index, enough for 2^19 files.
pub const MIN_FILE_INDEX_WIDTH: i32 = 6;
/// Maximum width of the storage file index, enough for 2^64 files.
pub const MAX_FILE_INDEX_WIDTH: i32 = 20;
/// Width used when the configured value is out of range.
pub const DEFAULT_FILE_INDEX_WIDTH: i32 = MAX_FILE_INDEX_WIDTH;

/// Default for `max-message-bytes` on MQ sinks (10 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Transaction atomicity level of a changefeed.
///
/// Kept as a raw string so unvalidated values parsed from a URI or file can
/// flow through reconciliation; [`validate`](Self::validate) rejects
/// anything outside `{unset, none, table}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomicityLevel(String);

impl AtomicityLevel {
    /// Atomicity of transactions is not guaranteed.
    pub fn none() -> Self {
        Self("none".to_string())
    }

    /// Atomicity of single-table transactions is guaranteed.
    pub fn table() -> Self {
        Self("table".to_string())
    }

    /// Whether the level was never set.
    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the sink may split a transaction across flushes. Unset is
    /// treated as the default level, `none`.
    pub fn should_split_txn(&self) -> bool {
        self.0.is_empty() || self.0 == "none"
    }

    fn validate(&self, scheme: &str) -> Result<()> {
        match self.0.as_str() {
            "" | "none" => Ok(()),
            "table" => {
                // MQ sinks cannot guarantee table-level atomicity.
                if scheme::is_mq_scheme(scheme) {
                    Err(SinkError::sink_uri_invalid(format!(
                        "table level atomicity is not supported by {scheme} scheme"
                    )))
                } else {
                    Ok(())
                }
            }
            other => Err(SinkError::sink_uri_invalid(format!(
                "{other} level atomicity is not supported by {scheme} scheme"
            ))),
        }
    }
}

impl From<&str> for AtomicityLevel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for AtomicityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition/topic routing rule for a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DispatchRule {
    pub matcher: Vec<String>,
    /// Deprecated, use `partition`. Migrated there during validation.
    pub dispatcher: String,
    pub partition: String,
    pub topic: String,
}

/// Column projection rule for a set of tables. Deprecated; carried for
/// configs that still set it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ColumnSelector {
    pub matcher: Vec<String>,
    pub columns: Vec<String>,
}

/// MQ codec tuning knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CodecConfig {
    pub enable_tidb_extension: Option<bool>,
    pub max_batch_size: Option<i32>,
    pub avro_enable_watermark: Option<bool>,
    pub avro_decimal_handling_mode: Option<String>,
    pub avro_bigint_unsigned_handling_mode: Option<String>,
}

/// Kafka sink settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct KafkaConfig {
    pub partition_num: Option<i32>,
    pub replication_factor: Option<i16>,
    pub kafka_version: Option<String>,
    pub max_message_bytes: Option<usize>,
    pub compression: Option<String>,
    pub kafka_client_id: Option<String>,
    pub auto_create_topic: Option<bool>,
    pub dial_timeout: Option<String>,
    pub write_timeout: Option<String>,
    pub read_timeout: Option<String>,
    pub required_acks: Option<i32>,
    pub sasl_user: Option<String>,
    pub sasl_password: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub enable_tls: Option<bool>,
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub insecure_skip_verify: Option<bool>,
    pub codec_config: Option<CodecConfig>,
    pub large_message_handle: Option<LargeMessageHandleConfig>,
}

/// Pulsar sink settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PulsarConfig {
    pub tls_certificate_path: Option<String>,
    pub tls_private_key_path: Option<String>,
    pub tls_trust_certs_file_path: Option<String>,
    pub pulsar_producer_cache_size: Option<i32>,
}

/// MySQL-compatible sink settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MySqlConfig {
    pub worker_count: Option<i32>,
    pub max_txn_row: Option<i32>,
    pub max_multi_update_row_size: Option<i32>,
    #[serde(rename = "max-multi-update-row")]
    pub max_multi_update_row_count: Option<i32>,
    pub tidb_txn_mode: Option<String>,
    pub ssl_ca: Option<String>,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub time_zone: Option<String>,
    pub write_timeout: Option<String>,
    pub read_timeout: Option<String>,
    pub timeout: Option<String>,
    pub enable_batch_dml: Option<bool>,
    pub enable_multi_statement: Option<bool>,
    pub enable_cache_prepared_statement: Option<bool>,
}

/// Cloud-storage sink settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CloudStorageConfig {
    pub worker_count: Option<i32>,
    pub flush_interval: Option<String>,
    pub file_size: Option<i32>,
    pub output_column_id: Option<bool>,
}

/// Sink configuration of a changefeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SinkConfig {
    #[serde(rename = "transaction-atomicity")]
    pub txn_atomicity: Option<AtomicityLevel>,
    /// Not available when the downstream is a database.
    pub protocol: Option<String>,

    /// Only available when the downstream is MQ.
    pub dispatchers: Vec<DispatchRule>,
    /// Only available when the downstream is storage.
    pub csv: Option<CsvConfig>,
    /// Deprecated.
    pub column_selectors: Vec<ColumnSelector>,
    /// Only available when the downstream is MQ using the avro protocol.
    pub schema_registry: Option<String>,
    /// Only available when the downstream is MQ.
    pub encoder_concurrency: Option<i32>,
    /// Not available when the downstream is a database.
    pub terminator: Option<String>,
    /// Only available when the downstream is storage.
    pub date_separator: Option<String>,
    /// Only available when the downstream is storage.
    pub enable_partition_separator: Option<bool>,
    /// Only available when the downstream is storage.
    #[serde(rename = "file-index-digit")]
    pub file_index_width: Option<i32>,

    /// Only available when the downstream is MQ.
    pub only_output_updated_columns: Option<bool>,
    /// Only available when the downstream is MQ.
    pub delete_only_output_handle_key_columns: Option<bool>,

    /// Only available when the downstream is a database.
    pub safe_mode: Option<bool>,
    pub kafka_config: Option<KafkaConfig>,
    pub pulsar_config: Option<PulsarConfig>,
    pub mysql_config: Option<MySqlConfig>,
    pub cloud_storage_config: Option<CloudStorageConfig>,
}

fn query_param(uri: &Url, key: &str) -> Option<String> {
    uri.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl SinkConfig {
    fn txn_atomicity_or_unknown(&self) -> AtomicityLevel {
        self.txn_atomicity.clone().unwrap_or_default()
    }

    /// Validate the configuration against the sink URI, applying the
    /// adjustments that survive validation: URI parameters override the
    /// config, deprecated fields are migrated, defaults are filled in.
    pub fn validate_and_adjust(&mut self, sink_uri: &Url) -> Result<()> {
        self.validate_and_adjust_sink_uri(sink_uri)?;

        if scheme::is_mysql_compatible_scheme(sink_uri.scheme()) {
            return Ok(());
        }

        for rule in &mut self.dispatchers {
            if !rule.dispatcher.is_empty() && !rule.partition.is_empty() {
                error!(?rule, "dispatcher and partition cannot both be configured");
                return Err(SinkError::sink_invalid_config(format!(
                    "dispatcher and partition cannot both be configured for rule {rule:?}"
                )));
            }
            // Only `partition` represents a partition rule after validation.
            if !rule.dispatcher.is_empty() {
                rule.partition = std::mem::take(&mut rule.dispatcher);
            }
        }

        if let Some(n) = self.encoder_concurrency {
            if n < 0 {
                return Err(SinkError::sink_invalid_config(format!(
                    "encoder-concurrency must not be negative, got {n}"
                )));
            }
        }

        if self.terminator.is_none() {
            self.terminator = Some(CRLF.to_string());
        }

        let protocol = self
            .protocol
            .as_deref()
            .unwrap_or("")
            .parse::<Protocol>()
            .ok();

        if self.delete_only_output_handle_key_columns.unwrap_or(false)
            && protocol == Some(Protocol::Csv)
        {
            return Err(SinkError::sink_invalid_config(
                "csv protocol always outputs all columns for delete events, \
                 do not set delete-only-output-handle-key-columns to true",
            ));
        }

        if scheme::is_storage_scheme(sink_uri.scheme()) {
            if let Some(sep) = self.date_separator.as_deref().filter(|s| !s.is_empty()) {
                DateSeparator::from_str(sep)?;
            }

            // Out-of-range widths are silently clamped to the default; most
            // users never touch this knob and old configs carry a zero.
            let width = self.file_index_width.unwrap_or(0);
            if !(MIN_FILE_INDEX_WIDTH..=MAX_FILE_INDEX_WIDTH).contains(&width) {
                self.file_index_width = Some(DEFAULT_FILE_INDEX_WIDTH);
            }

            if let Some(csv) = &self.csv {
                csv.validate_and_adjust()?;
            }
        }

        if let (Some(kafka), Some(protocol)) = (&self.kafka_config, protocol) {
            if let Some(large_message) = &kafka.large_message_handle {
                let enable_tidb_extension = kafka
                    .codec_config
                    .as_ref()
                    .and_then(|c| c.enable_tidb_extension)
                    .unwrap_or(false);
                large_message.validate(protocol, enable_tidb_extension)?;
            }
        }

        Ok(())
    }

    /// Validate and adjust `protocol` and `transaction-atomicity` against
    /// the sink URI.
    fn validate_and_adjust_sink_uri(&mut self, sink_uri: &Url) -> Result<()> {
        if let Err(err) = self.apply_parameter_by_sink_uri(sink_uri) {
            if !err.is_incompatible_sink_config() {
                return Err(err);
            }
            // Tolerated here to keep old changefeed configs creatable; the
            // URI value has already been applied and wins.
            warn!(error = %err, "sink URI and sink config disagree, using the sink URI value");
        }

        self.txn_atomicity_or_unknown().validate(sink_uri.scheme())?;

        // Any protocol is legal for the blackhole testing sink.
        if scheme::is_mq_scheme(sink_uri.scheme()) || scheme::is_storage_scheme(sink_uri.scheme())
        {
            self.protocol
                .as_deref()
                .unwrap_or("")
                .parse::<Protocol>()?;
        } else if scheme::is_mysql_compatible_scheme(sink_uri.scheme()) {
            if let Some(protocol) = &self.protocol {
                return Err(SinkError::sink_uri_invalid(format!(
                    "protocol {protocol} is incompatible with {} scheme",
                    sink_uri.scheme()
                )));
            }
        }

        info!(
            protocol = self.protocol.as_deref().unwrap_or(""),
            txn_atomicity = %self.txn_atomicity_or_unknown(),
            "parsed sink parameters from sink uri"
        );
        Ok(())
    }

    /// Overwrite `protocol` and `transaction-atomicity` with the values the
    /// sink URI carries. The URI wins; when both sides supplied different
    /// non-empty values the conflict is reported as
    /// [`SinkError::IncompatibleSinkConfig`] with both sides' `key=value`
    /// pairs, in deterministic key order.
    pub fn apply_parameter_by_sink_uri(&mut self, sink_uri: &Url) -> Result<()> {
        let mut in_uri: BTreeMap<&str, String> = BTreeMap::new();
        let mut in_file: BTreeMap<&str, String> = BTreeMap::new();

        if let Some(value) = query_param(sink_uri, TXN_ATOMICITY_KEY).filter(|v| !v.is_empty()) {
            let from_uri = AtomicityLevel::from(value.as_str());
            let current = self.txn_atomicity_or_unknown();
            if !current.is_unknown() && current != from_uri {
                in_uri.insert(TXN_ATOMICITY_KEY, from_uri.as_str().to_string());
                in_file.insert(TXN_ATOMICITY_KEY, current.as_str().to_string());
            }
            self.txn_atomicity = Some(from_uri);
        }

        if let Some(value) = query_param(sink_uri, PROTOCOL_KEY).filter(|v| !v.is_empty()) {
            if let Some(current) = self.protocol.as_ref().filter(|p| **p != value) {
                in_uri.insert(PROTOCOL_KEY, value.clone());
                in_file.insert(PROTOCOL_KEY, current.clone());
            }
            self.protocol = Some(value);
        }

        // The maps are filled pairwise; diverging sizes mean a programming
        // bug in this function, not user error.
        assert_eq!(
            in_uri.len(),
            in_file.len(),
            "inconsistent conflict maps for sink uri and config file"
        );
        if in_uri.is_empty() {
            return Ok(());
        }

        let render = |m: &BTreeMap<&str, String>| {
            m.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        Err(SinkError::IncompatibleSinkConfig {
            in_uri: render(&in_uri),
            in_file: render(&in_file),
        })
    }

    /// Check whether this updated configuration is compatible with the
    /// existing one under `sink_uri_str`.
    ///
    /// A conflict that the URI itself introduces (reconciling `old` against
    /// the new URI would already report it) is suppressed: the user is only
    /// adjusting the config to match the URI.
    pub fn check_compatibility_with_sink_uri(
        &mut self,
        old: &SinkConfig,
        sink_uri_str: &str,
    ) -> Result<()> {
        let sink_uri = Url::parse(sink_uri_str)
            .map_err(|e| SinkError::sink_uri_invalid(e.to_string()))?;

        let cfg_params_changed =
            self.protocol != old.protocol || self.txn_atomicity != old.txn_atomicity;

        let uri_params_changed = {
            let mut probe = old.clone();
            matches!(
                probe.apply_parameter_by_sink_uri(&sink_uri),
                Err(ref e) if e.is_incompatible_sink_config()
            )
        };

        if !uri_params_changed && !cfg_params_changed {
            return Ok(());
        }

        match self.apply_parameter_by_sink_uri(&sink_uri) {
            Err(e) if uri_params_changed && e.is_incompatible_sink_config() => Ok(()),
            other => other,
        }
    }
}
