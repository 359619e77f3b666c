//! Core types shared across the mv2s workspace: identifiers, the frame data
//! model, structured-memory data model, canonical encoding, digests, limits,
//! and the unified error taxonomy.

#![warn(missing_docs)]

pub mod canon;
pub mod digest;
pub mod error;
pub mod frame;
pub mod ids;
pub mod limits;
pub mod memory;

pub use error::{MvError, MvResult};
pub use frame::{FrameMeta, FrameStatus, PayloadDescriptor, PayloadEncoding, Tag};
pub use ids::{EntityId, EvidenceId, FactId, FrameId, Generation, PredicateId, SpanId, WalSequence};
pub use memory::{AsOf, BitemporalSpan, Entity, EntityAlias, Evidence, Fact, ObjectValue, Predicate};
