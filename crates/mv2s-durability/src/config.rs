//! WAL writer configuration.

/// Controls how aggressively the WAL writer calls `fsync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// `fsync` after every append.
    Always,
    /// `fsync` only when `record_checkpoint` is called (i.e. at commit).
    OnCommit,
    /// `fsync` once at least `N` bytes have been written since the last sync.
    EveryBytes(u64),
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        FsyncPolicy::OnCommit
    }
}
