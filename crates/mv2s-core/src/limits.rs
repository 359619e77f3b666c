//! Size and count limits enforced across the public API.

/// Minimum permitted WAL ring size (must comfortably fit a sentinel plus at
/// least one small record).
pub const MIN_WAL_SIZE: u64 = 8192;

/// Maximum `top_k` accepted by search/vector requests.
pub const MAX_TOP_K: usize = 10_000;

/// Maximum number of facts returned by a single `facts()` call.
pub const MAX_FACTS_RESULT: usize = 10_000;

/// Header page size (each of the two ping-ponged header pages).
pub const HEADER_PAGE_SIZE: u64 = 4096;

/// Minimum absolute offset at which the WAL region may begin.
pub const MIN_WAL_OFFSET: u64 = 8192;

/// WAL record header size (sequence + length + flags + checksum).
pub const WAL_RECORD_HEADER_SIZE: u64 = 48;
