//! Newtype identifiers.
//!
//! Wrapping raw `u64`s prevents mixing up frame ids, WAL sequence numbers,
//! and generation counters at call sites — the same rationale
//! `strata-core::types` uses for `RunId`/`BranchId`.

use std::fmt;

macro_rules! u64_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Construct from a raw value.
            pub const fn new(v: u64) -> Self {
                Self(v)
            }

            /// Unwrap to the raw value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

u64_id!(FrameId);
u64_id!(WalSequence);
u64_id!(Generation);
u64_id!(EntityId);
u64_id!(PredicateId);
u64_id!(FactId);
u64_id!(SpanId);
u64_id!(EvidenceId);

impl Generation {
    /// The next generation after this one.
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl WalSequence {
    /// The zero/"no commits yet" sequence.
    pub const ZERO: WalSequence = WalSequence(0);
}
