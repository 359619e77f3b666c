//! The store actor: single-owner-of-file orchestrator composing the
//! container codec, WAL ring, and in-memory TOC snapshot.

use crate::config::{StoreConfig, WriterLeasePolicy};
use crate::lease::{LeaseHandle, WriterLeaseManager};
use crate::stats::Stats;
use mv2s_core::{
    frame::{FrameMeta, FrameStatus, PayloadDescriptor, PayloadEncoding, Tag},
    ids::{FrameId, Generation},
    limits::{HEADER_PAGE_SIZE, MIN_WAL_OFFSET},
    MvError, MvResult,
};
use mv2s_durability::{entry::Entry, reader, writer::WalWriter};
use mv2s_storage::{
    compress::{compressor_for, Compressor, ZstdCompressor},
    digest::hash_range,
    format::{
        footer::{Footer, FOOTER_SIZE, MAX_FOOTER_SCAN_BYTES},
        header::{select_valid_page, HeaderPage, FORMAT_VERSION},
        toc::{IndexKind, IndexManifest, ManifestMeta, SegmentEntry, Toc},
    },
    ExclusiveLock, FileBackend,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Options accepted by [`Store::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Free-form kind discriminator.
    pub kind: Option<String>,
    /// Logical track/stream.
    pub track: Option<String>,
    /// Source URI.
    pub uri: Option<String>,
    /// Human-readable title.
    pub title: Option<String>,
    /// Full-text search source.
    pub search_text: Option<String>,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Free-form labels.
    pub labels: Vec<String>,
    /// Content dates (ms since epoch).
    pub content_dates: Vec<i64>,
    /// Capture time (ms since epoch). Defaults to 0 if unset by the caller.
    pub captured_at_ms: i64,
    /// Optional anchor time.
    pub anchor_at_ms: Option<i64>,
    /// Optional semantic role.
    pub role: Option<String>,
    /// Parent frame id, for chunked media.
    pub parent_id: Option<FrameId>,
    /// Chunk index within the parent.
    pub chunk_index: Option<u32>,
    /// Total chunk count of the parent.
    pub chunk_count: Option<u32>,
    /// Opaque chunk manifest bytes.
    pub chunk_manifest: Option<Vec<u8>>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Request zstd compression if it yields a strictly shorter payload.
    pub compress: bool,
}

struct StagedBlob {
    bytes: Vec<u8>,
    manifest: ManifestMeta,
}

/// The durable single-file frame store.
pub struct Store {
    backend: FileBackend,
    _lock: ExclusiveLock,
    path: PathBuf,
    wal_offset: u64,
    wal_size: u64,
    wal_writer: WalWriter,
    toc: Toc,
    generation: Generation,
    data_end: u64,
    active_header_slot: usize,
    header_page_generation: u64,
    pending: Vec<Entry>,
    staged_lex: Option<StagedBlob>,
    staged_vec: Option<StagedBlob>,
    stage_stamp: u64,
    write_lock: Mutex<()>,
    lease: Arc<WriterLeaseManager>,
}

impl Store {
    /// Create a new, empty container file at `path`.
    #[instrument(skip(config))]
    pub fn create(path: &Path, config: StoreConfig) -> MvResult<Self> {
        let wal_size = config.wal_size.max(mv2s_core::limits::MIN_WAL_SIZE);
        let wal_offset = MIN_WAL_OFFSET;
        let mut backend = FileBackend::create_new(path)?;
        backend.truncate(wal_offset + wal_size)?;

        let mut store = Self {
            backend,
            _lock: ExclusiveLock::try_acquire(path)?,
            path: path.to_path_buf(),
            wal_offset,
            wal_size,
            wal_writer: WalWriter::new(wal_offset, wal_size, config.fsync_policy),
            toc: Toc {
                frames: vec![],
                lex_manifest: None,
                vec_manifest: None,
                time_manifest: None,
                segments: vec![],
            },
            generation: Generation(0),
            data_end: wal_offset + wal_size,
            active_header_slot: 0,
            header_page_generation: 0,
            pending: vec![],
            staged_lex: None,
            staged_vec: None,
            stage_stamp: 0,
            write_lock: Mutex::new(()),
            lease: Arc::new(WriterLeaseManager::default()),
        };
        store.perform_commit_write()?;
        info!(path = %store.path.display(), "created store");
        Ok(store)
    }

    /// Open an existing container file, reconstructing pending mutations
    /// from the WAL.
    #[instrument]
    pub fn open(path: &Path) -> MvResult<Self> {
        let lock = ExclusiveLock::try_acquire(path)?;
        let mut backend = FileBackend::open_existing(path)?;

        let page0 = backend.read_exactly(0, HEADER_PAGE_SIZE as usize)?;
        let page1 = backend.read_exactly(HEADER_PAGE_SIZE, HEADER_PAGE_SIZE as usize)?;
        let header = select_valid_page(&page0, &page1)?;
        let active_header_slot = if header.header_page_generation % 2 == 0 { 0 } else { 1 };

        let footer = Self::find_valid_footer(&mut backend, header.footer_offset)?;
        let toc_offset = footer.0 - footer.1.toc_len;
        let toc_bytes = backend.read_exactly(toc_offset, footer.1.toc_len as usize)?;
        let toc = Toc::decode(
            &toc_bytes,
            header.wal_offset + header.wal_size,
            footer.0,
        )?;

        let scan = reader::scan(
            &mut backend,
            header.wal_offset,
            header.wal_size,
            header.wal_checkpoint_pos,
        )?;
        let pending: Vec<Entry> = scan.entries.into_iter().map(|(_, e)| e).collect();

        let wal_writer = WalWriter::resume(
            header.wal_offset,
            header.wal_size,
            header.wal_write_pos,
            header.wal_checkpoint_pos,
            scan.state.next_sequence.max(header.wal_committed_seq + 1),
            Default::default(),
        );

        let data_end = footer.0 + FOOTER_SIZE as u64;
        info!(path = %path.display(), pending = pending.len(), "opened store");

        Ok(Self {
            backend,
            _lock: lock,
            path: path.to_path_buf(),
            wal_offset: header.wal_offset,
            wal_size: header.wal_size,
            wal_writer,
            toc,
            generation: Generation(footer.1.file_generation),
            data_end,
            active_header_slot,
            header_page_generation: header.header_page_generation,
            pending,
            staged_lex: None,
            staged_vec: None,
            stage_stamp: 0,
            write_lock: Mutex::new(()),
            lease: Arc::new(WriterLeaseManager::default()),
        })
    }

    fn find_valid_footer(backend: &mut FileBackend, stored_offset: u64) -> MvResult<(u64, Footer)> {
        if let Ok(bytes) = backend.read_exactly(stored_offset, FOOTER_SIZE) {
            if let Ok(footer) = Footer::decode(&bytes) {
                return Ok((stored_offset, footer));
            }
        }
        let mut probe = stored_offset;
        let floor = stored_offset.saturating_sub(MAX_FOOTER_SCAN_BYTES);
        while probe > floor {
            probe = probe.saturating_sub(1);
            if let Ok(bytes) = backend.read_exactly(probe, FOOTER_SIZE) {
                if let Ok(footer) = Footer::decode(&bytes) {
                    return Ok((probe, footer));
                }
            }
        }
        Err(MvError::InvalidFooter {
            reason: "no valid footer found within scan window".to_string(),
        })
    }

    /// Acquire the named writer lease.
    pub fn acquire_writer_lease(&self, policy: WriterLeasePolicy) -> MvResult<LeaseHandle> {
        self.lease.acquire(policy)
    }

    fn next_frame_id(&self) -> FrameId {
        let committed = self.toc.frames.len() as u64;
        let pending_puts = self
            .pending
            .iter()
            .filter(|e| matches!(e, Entry::PutFrame(_)))
            .count() as u64;
        FrameId(committed + pending_puts)
    }

    /// Insert one frame, returning its assigned id.
    #[instrument(skip(self, content))]
    pub fn put(&mut self, content: &[u8], options: PutOptions) -> MvResult<FrameId> {
        let _guard = self.write_lock.lock();
        let id = self.next_frame_id();

        let canonical_digest = mv2s_storage::digest::hash_bytes(content);
        let (stored_bytes, encoding, canonical_length) = if options.compress {
            let compressed = ZstdCompressor::default().compress(content)?;
            if compressed.len() < content.len() {
                (compressed, PayloadEncoding::Zstd, Some(content.len() as u64))
            } else {
                (content.to_vec(), PayloadEncoding::Plain, None)
            }
        } else {
            (content.to_vec(), PayloadEncoding::Plain, None)
        };
        let stored_digest = mv2s_storage::digest::hash_bytes(&stored_bytes);

        let payload = PayloadDescriptor {
            payload_offset: self.data_end,
            payload_length: stored_bytes.len() as u64,
            encoding,
            canonical_length,
            canonical_digest: Some(canonical_digest),
            stored_digest: Some(stored_digest),
        };
        payload.validate().map_err(|reason| MvError::InvalidArgument(reason))?;

        let frame = FrameMeta {
            id,
            captured_at_ms: options.captured_at_ms,
            anchor_at_ms: options.anchor_at_ms,
            kind: options.kind,
            track: options.track,
            uri: options.uri,
            title: options.title,
            search_text: options.search_text,
            tags: options.tags,
            labels: options.labels,
            content_dates: options.content_dates,
            role: options.role,
            parent_id: options.parent_id,
            chunk_index: options.chunk_index,
            chunk_count: options.chunk_count,
            chunk_manifest: options.chunk_manifest,
            status: FrameStatus::Active,
            supersedes: None,
            superseded_by: None,
            metadata: options.metadata,
            payload,
        };

        let entry = Entry::PutFrame(Box::new(frame));
        self.append_with_retry(entry.encode())?;
        self.backend.write_all_at(self.data_end, &stored_bytes)?;
        self.data_end += stored_bytes.len() as u64;
        self.pending.push(entry);
        Ok(id)
    }

    /// Insert N frames in a single call: pre-plans ids and payload offsets,
    /// coalesces all payload bytes into one mapped-region write, and batches
    /// WAL records into a single `append_batch` call.
    #[instrument(skip(self, items))]
    pub fn put_batch(&mut self, items: Vec<(Vec<u8>, PutOptions)>) -> MvResult<Vec<FrameId>> {
        let _guard = self.write_lock.lock();
        let first_id = self.next_frame_id().0;

        let mut writes = Vec::with_capacity(items.len());
        let mut frames = Vec::with_capacity(items.len());
        let mut offset = self.data_end;
        for (i, (content, options)) in items.into_iter().enumerate() {
            let id = FrameId(first_id + i as u64);
            let canonical_digest = mv2s_storage::digest::hash_bytes(&content);
            let (stored_bytes, encoding, canonical_length) = if options.compress {
                let compressed = ZstdCompressor::default().compress(&content)?;
                if compressed.len() < content.len() {
                    (compressed, PayloadEncoding::Zstd, Some(content.len() as u64))
                } else {
                    (content.clone(), PayloadEncoding::Plain, None)
                }
            } else {
                (content.clone(), PayloadEncoding::Plain, None)
            };
            let stored_digest = mv2s_storage::digest::hash_bytes(&stored_bytes);

            let payload = PayloadDescriptor {
                payload_offset: offset,
                payload_length: stored_bytes.len() as u64,
                encoding,
                canonical_length,
                canonical_digest: Some(canonical_digest),
                stored_digest: Some(stored_digest),
            };
            payload.validate().map_err(MvError::InvalidArgument)?;

            let frame = FrameMeta {
                id,
                captured_at_ms: options.captured_at_ms,
                anchor_at_ms: options.anchor_at_ms,
                kind: options.kind,
                track: options.track,
                uri: options.uri,
                title: options.title,
                search_text: options.search_text,
                tags: options.tags,
                labels: options.labels,
                content_dates: options.content_dates,
                role: options.role,
                parent_id: options.parent_id,
                chunk_index: options.chunk_index,
                chunk_count: options.chunk_count,
                chunk_manifest: options.chunk_manifest,
                status: FrameStatus::Active,
                supersedes: None,
                superseded_by: None,
                metadata: options.metadata,
                payload,
            };

            offset += stored_bytes.len() as u64;
            writes.push((frame.payload.payload_offset, stored_bytes));
            frames.push(frame);
        }

        let entries: Vec<Entry> = frames
            .into_iter()
            .map(|f| Entry::PutFrame(Box::new(f)))
            .collect();
        let payloads: Vec<Vec<u8>> = entries.iter().map(|e| e.encode()).collect();

        match self.wal_writer.append_batch(&mut self.backend, payloads.clone()) {
            Ok(_) => {}
            Err(MvError::CapacityExceeded { .. }) => {
                self.commit()?;
                self.wal_writer.append_batch(&mut self.backend, payloads)?;
            }
            Err(e) => return Err(e),
        }

        self.backend.write_batch_mapped(&writes)?;
        self.data_end = offset;
        let ids: Vec<FrameId> = entries
            .iter()
            .map(|e| match e {
                Entry::PutFrame(f) => f.id,
                _ => unreachable!(),
            })
            .collect();
        self.pending.extend(entries);
        Ok(ids)
    }

    fn append_with_retry(&mut self, payload: Vec<u8>) -> MvResult<()> {
        match self.wal_writer.append(&mut self.backend, payload.clone()) {
            Ok(_) => Ok(()),
            Err(MvError::CapacityExceeded { .. }) => {
                self.commit()?;
                self.wal_writer
                    .append(&mut self.backend, payload)
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Tombstone an existing (or still-pending) frame.
    pub fn delete(&mut self, id: FrameId) -> MvResult<()> {
        let _guard = self.write_lock.lock();
        let entry = Entry::DeleteFrame { id };
        self.append_with_retry(entry.encode())?;
        self.pending.push(entry);
        Ok(())
    }

    /// Link `a` as superseded by `b`.
    pub fn supersede(&mut self, a: FrameId, b: FrameId) -> MvResult<()> {
        let _guard = self.write_lock.lock();
        let entry = Entry::SupersedeFrame { a, b };
        self.append_with_retry(entry.encode())?;
        self.pending.push(entry);
        Ok(())
    }

    /// Attach an embedding vector to a frame.
    pub fn put_embedding(&mut self, id: FrameId, vector: Vec<f32>) -> MvResult<()> {
        let _guard = self.write_lock.lock();
        self.check_embedding_dimension(vector.len())?;
        let entry = Entry::PutEmbedding { id, vector };
        self.append_with_retry(entry.encode())?;
        self.pending.push(entry);
        Ok(())
    }

    /// Attach embeddings to a batch of frames.
    pub fn put_embedding_batch(&mut self, items: Vec<(FrameId, Vec<f32>)>) -> MvResult<()> {
        for (id, vector) in items {
            self.put_embedding(id, vector)?;
        }
        Ok(())
    }

    fn check_embedding_dimension(&self, dim: usize) -> MvResult<()> {
        let expected = self.staged_vec.as_ref().and_then(|s| match &s.manifest {
            ManifestMeta::Vec { dimension, .. } => Some(*dimension as usize),
            _ => None,
        });
        let expected = expected.or_else(|| {
            self.toc.vec_manifest.as_ref().and_then(|m| match &m.meta {
                ManifestMeta::Vec { dimension, .. } => Some(*dimension as usize),
                _ => None,
            })
        });
        if let Some(expected) = expected {
            if expected != dim {
                return Err(MvError::DimensionMismatch {
                    expected,
                    got: dim,
                });
            }
        }
        Ok(())
    }

    /// Stash a lex index blob to be written on the next commit.
    pub fn stage_lex_index_for_next_commit(&mut self, bytes: Vec<u8>, doc_count: u64) -> u64 {
        self.staged_lex = Some(StagedBlob {
            bytes,
            manifest: ManifestMeta::Lex { doc_count },
        });
        self.stage_stamp += 1;
        self.stage_stamp
    }

    /// Stash a vector index blob to be written on the next commit.
    pub fn stage_vec_index_for_next_commit(
        &mut self,
        bytes: Vec<u8>,
        vector_count: u64,
        dimension: u32,
        similarity: u8,
    ) -> MvResult<u64> {
        self.check_embedding_dimension(dimension as usize)?;
        self.staged_vec = Some(StagedBlob {
            bytes,
            manifest: ManifestMeta::Vec {
                vector_count,
                dimension,
                similarity,
            },
        });
        self.stage_stamp += 1;
        Ok(self.stage_stamp)
    }

    /// Apply all pending mutations and staged blobs into a new committed
    /// generation.
    #[instrument(skip(self))]
    pub fn commit(&mut self) -> MvResult<Generation> {
        let _guard = self.write_lock.lock();
        self.perform_commit_write()
    }

    fn perform_commit_write(&mut self) -> MvResult<Generation> {
        let mut trial = self.toc.clone();
        let max_seq = self.wal_writer.next_sequence().saturating_sub(1);

        for entry in &self.pending {
            match entry {
                Entry::PutFrame(frame) => {
                    let mut frame = (**frame).clone();
                    frame.id = FrameId(trial.frames.len() as u64);
                    trial.frames.push(frame);
                }
                Entry::DeleteFrame { id } => {
                    let frame = trial
                        .frames
                        .get_mut(id.0 as usize)
                        .ok_or(MvError::FrameNotFound(id.0))?;
                    frame.status = FrameStatus::Deleted;
                }
                Entry::SupersedeFrame { a, b } => {
                    {
                        let fa = trial
                            .frames
                            .get_mut(a.0 as usize)
                            .ok_or(MvError::FrameNotFound(a.0))?;
                        if fa.superseded_by.is_some() && fa.superseded_by != Some(*b) {
                            return Err(MvError::InvalidToc {
                                reason: format!("frame {} already superseded", a.0),
                            });
                        }
                        fa.superseded_by = Some(*b);
                    }
                    let fb = trial
                        .frames
                        .get_mut(b.0 as usize)
                        .ok_or(MvError::FrameNotFound(b.0))?;
                    if fb.supersedes.is_some() && fb.supersedes != Some(*a) {
                        return Err(MvError::InvalidToc {
                            reason: format!("frame {} already supersedes another frame", b.0),
                        });
                    }
                    fb.supersedes = Some(*a);
                }
                Entry::PutEmbedding { id, .. } => {
                    if id.0 as usize >= trial.frames.len() {
                        return Err(MvError::FrameNotFound(id.0));
                    }
                }
            }
        }

        trial.validate_ranges(self.wal_offset + self.wal_size, self.data_end)?;

        if let Some(staged) = self.staged_lex.take() {
            let offset = self.data_end;
            let checksum = mv2s_storage::digest::hash_bytes(&staged.bytes);
            self.backend.write_all_at(offset, &staged.bytes)?;
            self.data_end += staged.bytes.len() as u64;
            trial.lex_manifest = Some(IndexManifest {
                bytes_offset: offset,
                bytes_length: staged.bytes.len() as u64,
                checksum,
                meta: staged.manifest,
            });
            trial.segments.push(SegmentEntry {
                kind: IndexKind::Lex,
                offset,
                length: staged.bytes.len() as u64,
                checksum,
            });
        }
        if let Some(staged) = self.staged_vec.take() {
            let offset = self.data_end;
            let checksum = mv2s_storage::digest::hash_bytes(&staged.bytes);
            self.backend.write_all_at(offset, &staged.bytes)?;
            self.data_end += staged.bytes.len() as u64;
            trial.vec_manifest = Some(IndexManifest {
                bytes_offset: offset,
                bytes_length: staged.bytes.len() as u64,
                checksum,
                meta: staged.manifest,
            });
            trial.segments.push(SegmentEntry {
                kind: IndexKind::Vec,
                offset,
                length: staged.bytes.len() as u64,
                checksum,
            });
        }

        let toc_bytes = trial.encode();
        let toc_offset = self.data_end;
        self.backend.write_all_at(toc_offset, &toc_bytes)?;
        let footer_offset = toc_offset + toc_bytes.len() as u64;
        let next_generation = self.generation.next();
        let footer = Footer {
            toc_len: toc_bytes.len() as u64,
            toc_hash: mv2s_storage::digest::hash_bytes(&toc_bytes),
            file_generation: next_generation.0,
            wal_committed_seq: max_seq,
        };
        self.backend.write_all_at(footer_offset, &footer.encode())?;
        self.backend.fsync()?;

        self.active_header_slot = 1 - self.active_header_slot;
        self.header_page_generation += 1;
        let header = HeaderPage {
            format_version: FORMAT_VERSION,
            spec_major: 1,
            spec_minor: 0,
            header_page_generation: self.header_page_generation,
            file_generation: next_generation.0,
            footer_offset,
            wal_offset: self.wal_offset,
            wal_size: self.wal_size,
            wal_write_pos: self.wal_writer.write_pos(),
            wal_checkpoint_pos: self.wal_writer.write_pos(),
            wal_committed_seq: max_seq,
            toc_checksum: footer.toc_hash,
        };
        let slot_offset = self.active_header_slot as u64 * HEADER_PAGE_SIZE;
        self.backend.write_all_at(slot_offset, &header.encode())?;
        self.backend.fsync()?;

        self.wal_writer.record_checkpoint();
        self.pending.clear();
        self.toc = trial;
        self.generation = next_generation;
        self.data_end = footer_offset + FOOTER_SIZE as u64;
        debug!(generation = next_generation.0, "commit complete");
        Ok(next_generation)
    }

    /// Committed snapshot lookup.
    pub fn frame_meta(&self, id: FrameId) -> MvResult<FrameMeta> {
        self.toc
            .frames
            .get(id.0 as usize)
            .cloned()
            .ok_or(MvError::FrameNotFound(id.0))
    }

    /// Batched committed snapshot lookup.
    pub fn frame_metas(&self, ids: &[FrameId]) -> MvResult<Vec<FrameMeta>> {
        ids.iter().map(|id| self.frame_meta(*id)).collect()
    }

    /// All committed frames.
    pub fn all_frame_metas(&self) -> Vec<FrameMeta> {
        self.toc.frames.clone()
    }

    /// Committed snapshot overlaid with pending `putFrame` records by id.
    pub fn frame_metas_including_pending(&self, ids: &[FrameId]) -> MvResult<Vec<FrameMeta>> {
        ids.iter()
            .map(|id| {
                for entry in self.pending.iter().rev() {
                    if let Entry::PutFrame(frame) = entry {
                        if frame.id == *id {
                            return Ok((**frame).clone());
                        }
                    }
                }
                self.frame_meta(*id)
            })
            .collect()
    }

    /// Read a frame's canonical content.
    pub fn frame_content(&mut self, id: FrameId) -> MvResult<Vec<u8>> {
        let frame = self.frame_meta(id)?;
        let stored = self
            .backend
            .read_exactly(frame.payload.payload_offset, frame.payload.payload_length as usize)?;
        self.decode_payload(&frame.payload, stored)
    }

    /// Read a frame's stored bytes as written on disk, without reversing its
    /// `PayloadEncoding`.
    pub fn frame_stored_content(&mut self, id: FrameId) -> MvResult<Vec<u8>> {
        let frame = self.frame_meta(id)?;
        self.backend
            .read_exactly(frame.payload.payload_offset, frame.payload.payload_length as usize)
    }

    fn decode_payload(&self, payload: &PayloadDescriptor, stored: Vec<u8>) -> MvResult<Vec<u8>> {
        if payload.encoding == PayloadEncoding::Plain {
            return Ok(stored);
        }
        let canonical_length = payload.canonical_length.ok_or_else(|| MvError::InvalidToc {
            reason: "compressed payload missing canonical_length".to_string(),
        })?;
        compressor_for(payload.encoding)?.decompress(&stored, canonical_length)
    }

    /// Read a bounded preview of a frame's content.
    pub fn frame_preview(&mut self, id: FrameId, max_bytes: usize) -> MvResult<Vec<u8>> {
        let frame = self.frame_meta(id)?;
        if frame.payload.encoding == PayloadEncoding::Plain {
            let take = max_bytes.min(frame.payload.payload_length as usize);
            self.backend.read_exactly(frame.payload.payload_offset, take)
        } else {
            let content = self.frame_content(id)?;
            Ok(content[..max_bytes.min(content.len())].to_vec())
        }
    }

    /// Batched content reads.
    pub fn frame_contents(&mut self, ids: &[FrameId]) -> MvResult<Vec<Vec<u8>>> {
        ids.iter().map(|id| self.frame_content(*id)).collect()
    }

    /// Batched preview reads.
    pub fn frame_previews(&mut self, ids: &[FrameId], max_bytes: usize) -> MvResult<Vec<Vec<u8>>> {
        ids.iter().map(|id| self.frame_preview(*id, max_bytes)).collect()
    }

    /// Find the surrogate frame id for a given source frame id, among live
    /// frames with `kind = "surrogate"` and `metadata["source_frame_id"]`.
    pub fn surrogate_frame_id(&self, source_id: FrameId) -> Option<FrameId> {
        let needle = source_id.0.to_string();
        self.toc
            .frames
            .iter()
            .find(|f| {
                f.is_live()
                    && f.kind.as_deref() == Some("surrogate")
                    && f.metadata.get("source_frame_id") == Some(&needle)
            })
            .map(|f| f.id)
    }

    /// Read and checksum-verify the committed lex index blob.
    pub fn read_committed_lex_index_bytes(&mut self) -> MvResult<Option<Vec<u8>>> {
        self.read_manifest_bytes(self.toc.lex_manifest.clone())
    }

    /// Read and checksum-verify the committed vector index blob.
    pub fn read_committed_vec_index_bytes(&mut self) -> MvResult<Option<Vec<u8>>> {
        self.read_manifest_bytes(self.toc.vec_manifest.clone())
    }

    fn read_manifest_bytes(&mut self, manifest: Option<IndexManifest>) -> MvResult<Option<Vec<u8>>> {
        let Some(m) = manifest else { return Ok(None) };
        let bytes = self
            .backend
            .read_exactly(m.bytes_offset, m.bytes_length as usize)?;
        if mv2s_storage::digest::hash_bytes(&bytes) != m.checksum {
            return Err(MvError::ChecksumMismatch {
                scope: "index manifest".to_string(),
            });
        }
        Ok(Some(bytes))
    }

    /// Re-validate the header pair, footer, and TOC; if `deep`, recompute
    /// every frame's stored digest (and canonical digest for compressed
    /// frames) plus every segment checksum.
    #[instrument(skip(self))]
    pub fn verify(&mut self, deep: bool) -> MvResult<()> {
        let page0 = self.backend.read_exactly(0, HEADER_PAGE_SIZE as usize)?;
        let page1 = self
            .backend
            .read_exactly(HEADER_PAGE_SIZE, HEADER_PAGE_SIZE as usize)?;
        let header = select_valid_page(&page0, &page1)?;
        let (footer_offset, footer) = Self::find_valid_footer(&mut self.backend, header.footer_offset)?;
        let toc_offset = footer_offset - footer.toc_len;
        let toc_bytes = self.backend.read_exactly(toc_offset, footer.toc_len as usize)?;
        let toc = Toc::decode(&toc_bytes, header.wal_offset + header.wal_size, footer_offset)?;

        if !deep {
            return Ok(());
        }

        for frame in &toc.frames {
            if frame.payload.payload_length == 0 {
                continue;
            }
            let actual = hash_range(
                &mut self.backend,
                frame.payload.payload_offset,
                frame.payload.payload_length,
            )?;
            if Some(actual) != frame.payload.stored_digest {
                return Err(MvError::ChecksumMismatch {
                    scope: format!("frame {} payload", frame.id.0),
                });
            }
            if frame.payload.encoding != PayloadEncoding::Plain {
                let stored = self.backend.read_exactly(
                    frame.payload.payload_offset,
                    frame.payload.payload_length as usize,
                )?;
                let canonical_length = frame.payload.canonical_length.ok_or_else(|| MvError::InvalidToc {
                    reason: "compressed frame missing canonical_length".to_string(),
                })?;
                let decompressed = compressor_for(frame.payload.encoding)?
                    .decompress(&stored, canonical_length)?;
                let canonical = mv2s_storage::digest::hash_bytes(&decompressed);
                if Some(canonical) != frame.payload.canonical_digest {
                    return Err(MvError::ChecksumMismatch {
                        scope: format!("frame {} canonical content", frame.id.0),
                    });
                }
            }
        }

        for segment in &toc.segments {
            let actual = hash_range(&mut self.backend, segment.offset, segment.length)?;
            if actual != segment.checksum {
                return Err(MvError::ChecksumMismatch {
                    scope: "segment".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Flush pending fsyncs and release the file handle and advisory lock.
    /// Pending (uncommitted) WAL entries remain on disk for the next open.
    pub fn close(mut self) -> MvResult<()> {
        self.backend.fsync()?;
        Ok(())
    }

    /// Snapshot of externally observable invariants.
    pub fn stats(&self) -> Stats {
        let deleted = self
            .toc
            .frames
            .iter()
            .filter(|f| f.status == FrameStatus::Deleted)
            .count() as u64;
        Stats {
            frame_count: self.toc.frames.len() as u64,
            deleted_count: deleted,
            generation: self.generation.0,
            wal_pending_bytes: self.wal_writer.pending_bytes(),
            wal_wrap_count: self.wal_writer.wrap_count(),
            data_bytes_used: self.data_end,
        }
    }

    /// Path this store was opened/created at.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
