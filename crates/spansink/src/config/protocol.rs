//! Sink protocol and storage-path enums.

use crate::error::SinkError;
use std::fmt;
use std::str::FromStr;

/// Wire protocol used to encode events for MQ and storage sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Open,
    Canal,
    CanalJson,
    Avro,
    Maxwell,
    Csv,
    Craft,
}

impl FromStr for Protocol {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // "default" is the deprecated alias of the open protocol.
            "open" | "open-protocol" | "default" => Ok(Protocol::Open),
            "canal" => Ok(Protocol::Canal),
            "canal-json" => Ok(Protocol::CanalJson),
            "avro" => Ok(Protocol::Avro),
            "maxwell" => Ok(Protocol::Maxwell),
            "csv" => Ok(Protocol::Csv),
            "craft" => Ok(Protocol::Craft),
            _ => Err(SinkError::sink_uri_invalid(format!(
                "unknown protocol {s:?}"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Open => "open",
            Protocol::Canal => "canal",
            Protocol::CanalJson => "canal-json",
            Protocol::Avro => "avro",
            Protocol::Maxwell => "maxwell",
            Protocol::Csv => "csv",
            Protocol::Craft => "craft",
        };
        write!(f, "{s}")
    }
}

/// Date separator used in storage-sink destination paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSeparator {
    #[default]
    None,
    Year,
    Month,
    Day,
}

impl FromStr for DateSeparator {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(DateSeparator::None),
            "year" => Ok(DateSeparator::Year),
            "month" => Ok(DateSeparator::Month),
            "day" => Ok(DateSeparator::Day),
            _ => Err(SinkError::StorageSinkInvalidDateSeparator(s.to_string())),
        }
    }
}

impl fmt::Display for DateSeparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DateSeparator::None => "none",
            DateSeparator::Year => "year",
            DateSeparator::Month => "month",
            DateSeparator::Day => "day",
        };
        write!(f, "{s}")
    }
}
