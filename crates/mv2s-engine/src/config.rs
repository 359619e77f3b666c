//! Store actor configuration.

use mv2s_core::limits::MIN_WAL_SIZE;
pub use mv2s_durability::FsyncPolicy;
use std::time::Duration;

/// How a caller wants to wait when acquiring the named writer lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterLeasePolicy {
    /// Return `writer_busy` immediately if the lease is held.
    Fail,
    /// Block until the lease becomes available.
    Wait,
    /// Block up to `Duration`, then return `writer_timeout`.
    Timeout(Duration),
}

/// Store-wide configuration, set at `create`/`open` time.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Size in bytes of the WAL ring region.
    pub wal_size: u64,
    /// When the WAL writer forces an `fsync`.
    pub fsync_policy: FsyncPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wal_size: MIN_WAL_SIZE * 8,
            fsync_policy: FsyncPolicy::OnCommit,
        }
    }
}
