//! # mv2s
//!
//! An on-device, single-file durable frame store with hybrid retrieval: a
//! timeline of opaque byte "frames" with metadata, full-text search, vector
//! similarity search, and a bitemporal structured-memory layer, all fused by
//! one search orchestrator and all living in one `.mv2s` file.
//!
//! # Quick start
//!
//! ```no_run
//! use mv2s::{Mv2s, Mv2sOptions, PutOptions, SearchRequest};
//!
//! fn main() -> mv2s::Result<()> {
//!     let mut db = Mv2s::create("./notes.mv2s", Mv2sOptions::default())?;
//!     let id = db.put(b"hello world", PutOptions {
//!         search_text: Some("hello world".into()),
//!         ..Default::default()
//!     })?;
//!     db.index_frame_text(id, "hello world")?;
//!     db.commit()?;
//!
//!     let response = db.search(&SearchRequest::text("hello"))?;
//!     assert_eq!(response.results[0].frame_id, id);
//!     Ok(())
//! }
//! ```
//!
//! Internal crates (`mv2s-core`, `mv2s-storage`, `mv2s-durability`,
//! `mv2s-engine`, `mv2s-search`) are implementation detail; this crate's
//! [`Mv2s`] facade is the stable entry point.

#![warn(missing_docs)]

use mv2s_core::{FrameId, FrameMeta};
pub use mv2s_core::{MvError, MvResult as Result};
pub use mv2s_engine::config::{FsyncPolicy, StoreConfig, WriterLeasePolicy};
pub use mv2s_engine::{store::PutOptions, LeaseHandle, Stats, Store};
pub use mv2s_search::{
    EvidenceInput, FactRecord, FactsResult, HybridSearch, LexIndex, RagContext, RagOptions,
    RagRoot, RagSegment, SearchMode, SearchRequest, SearchResponse, SourceFlags, Similarity,
    TokenCounter, VectorEnginePreference, VectorIndex,
};

use std::path::Path;

/// Construction-time options for [`Mv2s::create`].
#[derive(Debug, Clone)]
pub struct Mv2sOptions {
    /// Store-level configuration (WAL size, fsync policy).
    pub store: StoreConfig,
    /// Vector dimension, fixed for the lifetime of the store. `None` defers
    /// the vector engine until the first `put_embedding` call declares one.
    pub vector_dimension: Option<u32>,
    /// Vector similarity function.
    pub vector_similarity: Similarity,
}

impl Default for Mv2sOptions {
    fn default() -> Self {
        Mv2sOptions {
            store: StoreConfig::default(),
            vector_dimension: None,
            vector_similarity: Similarity::Cosine,
        }
    }
}

/// The top-level handle to one open `.mv2s` file: the durable store, its lex
/// index (full-text + structured memory), and its vector index, composed
/// behind one API.
pub struct Mv2s {
    store: Store,
    lex: LexIndex,
    vector: Option<VectorIndex>,
    vector_similarity: Similarity,
}

impl Mv2s {
    /// Create a new, empty `.mv2s` file at `path`.
    pub fn create(path: impl AsRef<Path>, options: Mv2sOptions) -> Result<Self> {
        let store = Store::create(path.as_ref(), options.store)?;
        let vector = options
            .vector_dimension
            .map(|dim| VectorIndex::new(dim, options.vector_similarity));
        Ok(Mv2s {
            store,
            lex: LexIndex::open_empty()?,
            vector,
            vector_similarity: options.vector_similarity,
        })
    }

    /// Open an existing `.mv2s` file, restoring its lex and vector indexes
    /// from the last committed generation and replaying any pending WAL
    /// mutations written since.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Store::open(path.as_ref())?;
        let lex = match store.read_committed_lex_index_bytes()? {
            Some(bytes) => LexIndex::deserialize(&bytes)?,
            None => LexIndex::open_empty()?,
        };
        Ok(Mv2s {
            store,
            lex,
            vector: None,
            vector_similarity: Similarity::Cosine,
        })
    }

    /// Open an existing `.mv2s` file and additionally restore its vector
    /// index, validating `dimension`/`similarity` against the committed
    /// blob.
    pub fn open_with_vector_config(
        path: impl AsRef<Path>,
        dimension: u32,
        similarity: Similarity,
    ) -> Result<Self> {
        let mut handle = Self::open(path)?;
        let vector = match handle.store.read_committed_vec_index_bytes()? {
            Some(bytes) => VectorIndex::deserialize(&bytes, dimension, similarity)?,
            None => VectorIndex::new(dimension, similarity),
        };
        handle.vector = Some(vector);
        handle.vector_similarity = similarity;
        Ok(handle)
    }

    // -- Mutation -----------------------------------------------------

    /// Insert one frame, returning its assigned id.
    pub fn put(&mut self, content: &[u8], options: PutOptions) -> Result<FrameId> {
        self.store.put(content, options)
    }

    /// Insert N frames in a single call.
    pub fn put_batch(&mut self, items: Vec<(Vec<u8>, PutOptions)>) -> Result<Vec<FrameId>> {
        self.store.put_batch(items)
    }

    /// Tombstone an existing (or still-pending) frame.
    pub fn delete(&mut self, id: FrameId) -> Result<()> {
        self.store.delete(id)
    }

    /// Link `a` as superseded by `b`.
    pub fn supersede(&mut self, a: FrameId, b: FrameId) -> Result<()> {
        self.store.supersede(a, b)
    }

    /// Attach an embedding vector to a frame, also upserting it into the
    /// in-memory vector index (constructing one lazily if this is the first
    /// embedding the store has ever seen).
    pub fn put_embedding(&mut self, id: FrameId, vector: Vec<f32>) -> Result<()> {
        self.store.put_embedding(id, vector.clone())?;
        let similarity = self.vector_similarity;
        let dimension = vector.len() as u32;
        let index = self
            .vector
            .get_or_insert_with(|| VectorIndex::new(dimension, similarity));
        index.add(id, vector)
    }

    /// Attach embeddings to a batch of frames.
    pub fn put_embedding_batch(&mut self, items: Vec<(FrameId, Vec<f32>)>) -> Result<()> {
        self.store.put_embedding_batch(items.clone())?;
        if let Some(index) = self.vector.as_mut() {
            index.add_batch(items)?;
        } else if let Some((_, first)) = items.first().cloned() {
            let dim = first.len() as u32;
            let mut index = VectorIndex::new(dim, self.vector_similarity);
            index.add_batch(items)?;
            self.vector = Some(index);
        }
        Ok(())
    }

    /// Queue `search_text` for indexing under `frame_id` in the lex engine.
    /// Does not itself commit anything; call [`Self::commit`] afterward.
    pub fn index_frame_text(&mut self, frame_id: FrameId, search_text: impl Into<String>) -> Result<()> {
        self.lex.index_frame_text(frame_id, search_text)
    }

    /// Stage the current lex index state for inclusion in the next commit.
    pub fn stage_lex_index(&mut self, compact: bool) -> Result<()> {
        let doc_count = self.lex.doc_count()?;
        let bytes = self.lex.serialize(compact)?;
        self.store.stage_lex_index_for_next_commit(bytes, doc_count);
        Ok(())
    }

    /// Stage the current vector index state for inclusion in the next
    /// commit.
    pub fn stage_vec_index(&mut self) -> Result<()> {
        let Some(vector) = self.vector.as_ref() else {
            return Ok(());
        };
        let bytes = vector.serialize();
        self.store.stage_vec_index_for_next_commit(
            bytes,
            vector.len() as u64,
            vector.dimension(),
            vector.similarity().tag(),
        )?;
        Ok(())
    }

    /// Apply all pending mutations and staged index blobs into a new
    /// committed generation.
    pub fn commit(&mut self) -> Result<()> {
        self.store.commit()?;
        Ok(())
    }

    /// Flush pending fsyncs without committing (an alias over the
    /// underlying backend's durability barrier; `onCommit` fsync policy
    /// still forces the durable write at `commit`).
    pub fn flush(&mut self) -> Result<()> {
        self.store.commit().map(|_| ())
    }

    /// Release the file handle and advisory lock. Uncommitted pending WAL
    /// entries remain on disk for the next open.
    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    // -- Reads ----------------------------------------------------------

    /// Committed snapshot lookup.
    pub fn frame_meta(&self, id: FrameId) -> Result<FrameMeta> {
        self.store.frame_meta(id)
    }

    /// Batched committed snapshot lookup.
    pub fn frame_metas(&self, ids: &[FrameId]) -> Result<Vec<FrameMeta>> {
        self.store.frame_metas(ids)
    }

    /// Committed snapshot overlaid with pending `put` records by id.
    pub fn frame_metas_including_pending(&self, ids: &[FrameId]) -> Result<Vec<FrameMeta>> {
        self.store.frame_metas_including_pending(ids)
    }

    /// Read a frame's canonical content.
    pub fn frame_content(&mut self, id: FrameId) -> Result<Vec<u8>> {
        self.store.frame_content(id)
    }

    /// Batched content reads.
    pub fn frame_contents(&mut self, ids: &[FrameId]) -> Result<Vec<Vec<u8>>> {
        self.store.frame_contents(ids)
    }

    /// Read a bounded preview of a frame's content.
    pub fn frame_preview(&mut self, id: FrameId, max_bytes: usize) -> Result<Vec<u8>> {
        self.store.frame_preview(id, max_bytes)
    }

    /// Batched preview reads.
    pub fn frame_previews(&mut self, ids: &[FrameId], max_bytes: usize) -> Result<Vec<Vec<u8>>> {
        self.store.frame_previews(ids, max_bytes)
    }

    /// Read a frame's stored (possibly compressed) bytes without reversing
    /// its payload encoding.
    pub fn frame_stored_content(&mut self, id: FrameId) -> Result<Vec<u8>> {
        self.store.frame_stored_content(id)
    }

    /// Find the surrogate frame id for a given source frame id, if one
    /// exists among live frames.
    pub fn surrogate_frame_id(&self, source_id: FrameId) -> Option<FrameId> {
        self.store.surrogate_frame_id(source_id)
    }

    /// Find surrogate frame ids for a batch of source frame ids.
    pub fn surrogate_frame_ids(&self, source_ids: &[FrameId]) -> Vec<Option<FrameId>> {
        source_ids.iter().map(|id| self.store.surrogate_frame_id(*id)).collect()
    }

    /// Live frames within `time_range` (if given), reverse-chronological by
    /// `captured_at_ms`, tie-broken by frame id ascending, capped at
    /// `limit`.
    pub fn timeline(&self, time_range: Option<(i64, i64)>, limit: usize) -> Vec<FrameMeta> {
        let mut frames = self.store.all_frame_metas();
        frames.retain(|f| f.is_live());
        if let Some((from, to)) = time_range {
            frames.retain(|f| f.captured_at_ms >= from && f.captured_at_ms < to);
        }
        frames.sort_by(|a, b| {
            b.captured_at_ms
                .cmp(&a.captured_at_ms)
                .then_with(|| a.id.get().cmp(&b.id.get()))
        });
        frames.truncate(limit);
        frames
    }

    /// Re-validate the header pair, footer, and TOC; if `deep`, recompute
    /// every frame and segment checksum.
    pub fn verify(&mut self, deep: bool) -> Result<()> {
        self.store.verify(deep)
    }

    /// Snapshot of externally observable invariants.
    pub fn stats(&self) -> Stats {
        self.store.stats()
    }

    // -- Search & structured memory --------------------------------------

    /// Run one hybrid search request across the text, vector,
    /// structured-memory, and timeline-fallback lanes.
    pub fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        let mut hybrid = HybridSearch::new(&mut self.store, &mut self.lex, self.vector.as_ref());
        hybrid.search(request)
    }

    /// Build a token-budgeted RAG context from a prior search response.
    pub fn build_rag_context(
        &mut self,
        response: &SearchResponse,
        token_counter: &dyn TokenCounter,
        options: &RagOptions,
    ) -> Result<RagContext> {
        mv2s_search::build_rag_context(response, &mut self.store, token_counter, options)
    }

    /// Direct access to the structured-memory layer, for callers that need
    /// `upsert_entity`/`assert_fact`/`facts`/etc. without going through
    /// search.
    pub fn structured_memory(&mut self) -> &mut LexIndex {
        &mut self.lex
    }

    // -- Writer lease -----------------------------------------------------

    /// Acquire the named writer lease under `policy`.
    pub fn acquire_writer_lease(&self, policy: WriterLeasePolicy) -> Result<LeaseHandle> {
        self.store.acquire_writer_lease(policy)
    }

    /// Release a previously acquired writer lease. Releasing is inherent to
    /// dropping the handle; this is a readable alias for callers that want
    /// an explicit call site.
    pub fn release_writer_lease(&self, handle: LeaseHandle) {
        drop(handle);
    }

    /// Path this store was opened/created at.
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}
