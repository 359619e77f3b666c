//! Externally observable store snapshot.

/// Point-in-time counters exposing otherwise-internal invariants for
/// inspection (dense ids, generation monotonicity, WAL wrap behavior)
/// without reaching into actor internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Total committed frame count (including deleted/superseded).
    pub frame_count: u64,
    /// Count of frames with `status = deleted`.
    pub deleted_count: u64,
    /// Current container generation.
    pub generation: u64,
    /// Bytes of WAL currently pending (written since the last checkpoint).
    pub wal_pending_bytes: u64,
    /// Number of times the WAL ring has wrapped since the store was opened.
    pub wal_wrap_count: u64,
    /// Bytes of the data region currently in use.
    pub data_bytes_used: u64,
}
