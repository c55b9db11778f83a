//! Sink URI scheme families.
//!
//! The scheme selects the backend family and thereby which configuration
//! rules apply. Note that `url::Url` lowercases schemes during parsing, so
//! the matchers only need lowercase forms.

/// MySQL-compatible database schemes.
pub fn is_mysql_compatible_scheme(scheme: &str) -> bool {
    matches!(scheme, "mysql" | "mysql+ssl" | "tidb" | "tidb+ssl")
}

/// Message-queue schemes.
pub fn is_mq_scheme(scheme: &str) -> bool {
    matches!(
        scheme,
        "kafka" | "kafka+ssl" | "pulsar" | "pulsar+ssl" | "pulsar+http" | "pulsar+https"
    )
}

/// Object/cloud-storage schemes.
pub fn is_storage_scheme(scheme: &str) -> bool {
    matches!(
        scheme,
        "file" | "local" | "s3" | "gcs" | "gs" | "azblob" | "azure"
    )
}

/// The testing sink; accepts any protocol.
pub fn is_blackhole_scheme(scheme: &str) -> bool {
    scheme == "blackhole"
}

/// Whether the scheme names any supported sink family.
pub fn is_supported_scheme(scheme: &str) -> bool {
    is_mysql_compatible_scheme(scheme)
        || is_mq_scheme(scheme)
        || is_storage_scheme(scheme)
        || is_blackhole_scheme(scheme)
}
