//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache.
///
/// Only [`Error::UnknownNamespace`] ever reaches callers of the public
/// manager API; every other variant is caught at the tier boundary, logged,
/// and converted into a miss or a skipped write.
#[derive(Error, Debug)]
pub enum Error {
    /// Namespace is not declared in the policy table (misconfiguration,
    /// fails fast)
    #[error("unknown cache namespace: {namespace}")]
    UnknownNamespace { namespace: String },

    /// Invalid configuration
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be serialized for a cold tier
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decompression failed
    #[error("decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Stored bytes do not form a valid envelope
    #[error("corrupt cache payload: {0}")]
    CorruptPayload(String),

    /// A Tier 2/3 backend is unreachable or returned an error
    #[error("tier {tier} backend unavailable: {reason}")]
    TierUnavailable { tier: &'static str, reason: String },

    /// A Tier 2/3 call exceeded its deadline
    #[error("tier {tier} operation timed out after {millis}ms")]
    Timeout { tier: &'static str, millis: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownNamespace {
            namespace: "serp".into(),
        };
        assert_eq!(err.to_string(), "unknown cache namespace: serp");

        let err = Error::Timeout {
            tier: "tier2",
            millis: 50,
        };
        assert_eq!(err.to_string(), "tier tier2 operation timed out after 50ms");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
