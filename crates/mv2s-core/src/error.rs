//! Unified error taxonomy for mv2s.
//!
//! All public APIs return [`MvResult<T>`]. Errors are grouped into the four
//! propagation classes from the error-handling design: input errors,
//! capacity/resource errors, integrity errors, and fatal writer faults.

use std::io;
use thiserror::Error;

/// Result type alias used throughout mv2s.
pub type MvResult<T> = std::result::Result<T, MvError>;

/// Error taxonomy exposed by mv2s.
#[derive(Debug, Error)]
pub enum MvError {
    /// Underlying I/O failure (read/write/fsync/truncate).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Header page(s) failed to decode or verify.
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// Why the header was rejected.
        reason: String,
    },

    /// Footer failed to decode or verify.
    #[error("invalid footer: {reason}")]
    InvalidFooter {
        /// Why the footer was rejected.
        reason: String,
    },

    /// Table of contents failed to decode or an invariant was violated.
    #[error("invalid toc: {reason}")]
    InvalidToc {
        /// Why the TOC was rejected.
        reason: String,
    },

    /// A value could not be encoded into its on-disk representation.
    #[error("encoding error: {reason}")]
    EncodingError {
        /// Why encoding failed.
        reason: String,
    },

    /// A value could not be decoded from its on-disk representation.
    #[error("decoding error: {reason}")]
    DecodingError {
        /// Why decoding failed.
        reason: String,
    },

    /// The WAL ring contained a structurally invalid record.
    #[error("wal corruption at offset {offset}: {reason}")]
    WalCorruption {
        /// Byte offset (relative to `wal_offset`) of the offending record.
        offset: u64,
        /// Why the record was rejected.
        reason: String,
    },

    /// A resource limit (WAL capacity, batch size, …) was exceeded.
    #[error("capacity exceeded: limit {limit}, requested {requested}")]
    CapacityExceeded {
        /// The limit that was in effect.
        limit: u64,
        /// What was requested.
        requested: u64,
    },

    /// A checksum did not match its expected value.
    #[error("checksum mismatch: {scope}")]
    ChecksumMismatch {
        /// What was being checked (e.g. "frame 12 payload", "toc", "header page 0").
        scope: String,
    },

    /// A referenced frame id does not exist in the committed TOC.
    #[error("frame not found: {0}")]
    FrameNotFound(u64),

    /// A writer lease is held by another caller and the policy was `fail`.
    #[error("writer busy")]
    WriterBusy,

    /// A writer lease `timeout(d)` policy elapsed before acquisition.
    #[error("writer lease timed out")]
    WriterTimeout,

    /// Caller-supplied argument was invalid on its own terms (no state mutated).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector dimension did not match the configured/committed dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Dimension actually supplied.
        got: usize,
    },

    /// The WAL writer suffered a partial positional write and is now poisoned.
    #[error("wal writer faulted, reopen required: {reason}")]
    WriterFaulted {
        /// Description of the fault.
        reason: String,
    },
}

impl MvError {
    /// Input errors: caller-correctable, no state mutated before return.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MvError::InvalidArgument(_) | MvError::DimensionMismatch { .. }
        )
    }

    /// Capacity/resource errors: may be retried once by the caller (e.g.
    /// commit-and-retry on WAL capacity exhaustion).
    pub fn is_capacity_error(&self) -> bool {
        matches!(self, MvError::CapacityExceeded { .. })
    }

    /// Integrity errors: corruption detected with precise location info.
    /// The store generally remains readable at the previous good generation.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            MvError::InvalidHeader { .. }
                | MvError::InvalidFooter { .. }
                | MvError::InvalidToc { .. }
                | MvError::WalCorruption { .. }
                | MvError::ChecksumMismatch { .. }
        )
    }

    /// Fatal writer faults: recovery requires reopening the file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MvError::WriterFaulted { .. })
    }
}
