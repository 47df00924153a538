//! Error types for the store layer.
//!
//! Two enums cover every failure the crate can surface:
//!
//! | Type | Raised by | Typical handling |
//! |------|-----------|------------------|
//! | [`CodecError`] | element and index encoding | logged, record dropped or index discarded |
//! | [`StoreError`] | construction, `remove_all`, policy changes | returned to the caller |
//!
//! Most runtime failures inside the disk store never reach the caller. A cache
//! stays usable with reduced persistence: read failures become "not found",
//! failed writes are dropped and logged. Only construction, `remove_all` and
//! unsupported policy requests return a `StoreError`.

use crate::policy::EvictionPolicy;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by store construction and the few fallible store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage directory or data file could not be created or opened.
    #[error("could not create disk store {name}: {source}")]
    Initialization {
        /// Name of the store being constructed.
        name: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// A read or write against the data or index file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An element or index record could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The persisted index is malformed or disagrees with the data file.
    #[error("corrupt index file {}: {detail}", path.display())]
    IndexCorruption {
        /// Path of the offending index file.
        path: PathBuf,
        /// What was wrong with it.
        detail: String,
    },

    /// The store does not support the requested eviction policy.
    #[error("unsupported eviction policy {0}: the disk store only uses LFU")]
    UnsupportedPolicy(EvictionPolicy),

    /// The store has been disposed (or never finished initialising).
    #[error("store {0} is not alive")]
    NotAlive(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    pub(crate) fn init(name: &str, source: io::Error) -> Self {
        StoreError::Initialization {
            name: name.to_owned(),
            source,
        }
    }
}

/// Errors produced while encoding or decoding the binary record formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The input ended before a complete field could be read.
    #[error("truncated record: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the field being read.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// The record was written by an unknown format version.
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),

    /// The stored checksum does not match the record contents.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum found in the record.
        stored: u32,
        /// Checksum computed over the record contents.
        computed: u32,
    },

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A field holds a value the decoder cannot represent.
    #[error("invalid record: {0}")]
    Invalid(String),

    /// A field is longer than the format can address.
    #[error("field of {0} bytes exceeds the record size limit")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_display_names_store() {
        let err = StoreError::init(
            "sessions",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("sessions"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_codec_error_converts_into_store_error() {
        let err: StoreError = CodecError::UnsupportedVersion(9).into();
        assert!(matches!(err, StoreError::Codec(CodecError::UnsupportedVersion(9))));
        assert_eq!(err.to_string(), "unsupported record version 9");
    }

    #[test]
    fn test_unsupported_policy_message() {
        let err = StoreError::UnsupportedPolicy(EvictionPolicy::Lru);
        assert!(err.to_string().contains("LRU"));
    }
}
