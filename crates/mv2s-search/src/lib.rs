//! Hybrid retrieval over a committed `.mv2s` store: the lex index engine
//! (full-text search plus structured memory), the flat vector index engine,
//! the hybrid search orchestrator fusing both with a structured-memory
//! evidence lane and a timeline fallback, and a token-budgeted RAG context
//! builder.

#![warn(missing_docs)]

pub mod fuser;
pub mod hybrid;
pub mod lex;
pub mod rag;
pub mod request;
pub mod vector;

pub use fuser::{Fused, LaneResult};
pub use hybrid::HybridSearch;
pub use lex::{EvidenceInput, FactRecord, FactsResult, LexIndex, TextHit};
pub use rag::{build as build_rag_context, RagContext, RagOptions, RagRoot, RagSegment, TokenCounter};
pub use request::{SearchMode, SearchRequest, SearchResponse, SearchResult, SourceFlags, VectorEnginePreference};
pub use vector::{Similarity, VectorIndex};
