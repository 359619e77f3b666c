//! WAL ring writer: append/batched append, padding/wrap/sentinel handling,
//! capacity guard, fsync policy, checkpointing.

use crate::config::FsyncPolicy;
use crate::record::{RawRecord, RECORD_HEADER_SIZE};
use mv2s_core::{ids::WalSequence, MvError, MvResult};
use mv2s_storage::FileBackend;
use tracing::{debug, trace};

/// Append-only writer over a fixed-size ring region of the container file.
pub struct WalWriter {
    wal_offset: u64,
    wal_size: u64,
    write_pos: u64,
    checkpoint_pos: u64,
    next_seq: u64,
    bytes_since_fsync: u64,
    policy: FsyncPolicy,
    faulted: Option<String>,
    wrap_count: u64,
}

impl WalWriter {
    /// Construct a writer resuming at the given ring positions and next
    /// sequence number (as recovered from the header page / WAL scan).
    pub fn resume(
        wal_offset: u64,
        wal_size: u64,
        write_pos: u64,
        checkpoint_pos: u64,
        next_seq: u64,
        policy: FsyncPolicy,
    ) -> Self {
        Self {
            wal_offset,
            wal_size,
            write_pos,
            checkpoint_pos,
            next_seq,
            bytes_since_fsync: 0,
            policy,
            faulted: None,
            wrap_count: 0,
        }
    }

    /// Fresh writer over an empty ring.
    pub fn new(wal_offset: u64, wal_size: u64, policy: FsyncPolicy) -> Self {
        Self::resume(wal_offset, wal_size, 0, 0, 1, policy)
    }

    /// Current write cursor, relative to `wal_offset`.
    pub fn write_pos(&self) -> u64 {
        self.write_pos
    }

    /// Current checkpoint cursor, relative to `wal_offset`.
    pub fn checkpoint_pos(&self) -> u64 {
        self.checkpoint_pos
    }

    /// Number of times the write cursor has wrapped back to the start of
    /// the ring since this writer was constructed.
    pub fn wrap_count(&self) -> u64 {
        self.wrap_count
    }

    fn used_bytes(&self) -> u64 {
        if self.write_pos >= self.checkpoint_pos {
            self.write_pos - self.checkpoint_pos
        } else {
            self.wal_size - self.checkpoint_pos + self.write_pos
        }
    }

    /// Bytes written since the last checkpoint, correctly accounting for a
    /// write cursor that has wrapped past the checkpoint position.
    pub fn pending_bytes(&self) -> u64 {
        self.used_bytes()
    }

    fn remaining_to_ring_end(&self) -> u64 {
        self.wal_size - self.write_pos
    }

    fn ensure_capacity(&self, needed: u64) -> MvResult<()> {
        let free = self.wal_size.saturating_sub(self.used_bytes());
        if needed > free {
            return Err(MvError::CapacityExceeded {
                limit: free,
                requested: needed,
            });
        }
        Ok(())
    }

    fn require_not_faulted(&self) -> MvResult<()> {
        if let Some(reason) = &self.faulted {
            return Err(MvError::WriterFaulted {
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn write_record_at_cursor(&mut self, backend: &mut FileBackend, record: &RawRecord) -> MvResult<()> {
        let abs_offset = self.wal_offset + self.write_pos;
        let bytes = record.encode();
        backend.write_all_at(abs_offset, &bytes).map_err(|e| {
            self.faulted = Some(e.to_string());
            MvError::WriterFaulted {
                reason: e.to_string(),
            }
        })?;
        self.bytes_since_fsync += bytes.len() as u64;
        Ok(())
    }

    /// Append one entry's payload bytes to the ring, returning its assigned
    /// sequence number.
    pub fn append(&mut self, backend: &mut FileBackend, payload: Vec<u8>) -> MvResult<WalSequence> {
        let seq = self.append_inner(backend, payload)?;
        self.maybe_fsync(backend, false)?;
        Ok(seq)
    }

    /// Append a batch of entries, writing each record in sequence and
    /// performing at most one fsync for the whole batch regardless of policy.
    pub fn append_batch(
        &mut self,
        backend: &mut FileBackend,
        payloads: Vec<Vec<u8>>,
    ) -> MvResult<Vec<WalSequence>> {
        let mut seqs = Vec::with_capacity(payloads.len());
        for payload in payloads {
            seqs.push(self.append_inner(backend, payload)?);
        }
        self.maybe_fsync(backend, true)?;
        Ok(seqs)
    }

    fn append_inner(&mut self, backend: &mut FileBackend, payload: Vec<u8>) -> MvResult<WalSequence> {
        self.require_not_faulted()?;
        if payload.len() > u32::MAX as usize {
            return Err(MvError::CapacityExceeded {
                limit: u32::MAX as u64,
                requested: payload.len() as u64,
            });
        }
        let record_len = RECORD_HEADER_SIZE as u64 + payload.len() as u64;
        let sentinel_len = RECORD_HEADER_SIZE as u64;

        self.ensure_capacity(record_len + sentinel_len)?;

        if self.remaining_to_ring_end() < record_len {
            let remaining = self.remaining_to_ring_end();
            if remaining >= RECORD_HEADER_SIZE as u64 {
                // Enough room for a padding record's header; its `length`
                // records the skip *beyond* that header so the record's
                // on-disk footprint (header + skip) exactly fills `remaining`.
                let skip = remaining - RECORD_HEADER_SIZE as u64;
                let padding = RawRecord::padding(self.next_seq, skip as u32);
                self.next_seq += 1;
                self.write_record_at_cursor(backend, &padding)?;
            } else if remaining > 0 {
                // Not even a 48-byte header fits before the ring boundary;
                // zero-fill the remainder instead of writing a record the
                // reader could never safely decode a header from.
                let abs_offset = self.wal_offset + self.write_pos;
                let zeros = vec![0u8; remaining as usize];
                backend.write_all_at(abs_offset, &zeros).map_err(|e| {
                    self.faulted = Some(e.to_string());
                    MvError::WriterFaulted {
                        reason: e.to_string(),
                    }
                })?;
            }
            self.write_pos = 0;
            self.wrap_count += 1;
            self.ensure_capacity(record_len + sentinel_len)?;
        }

        // Built only now, after any padding above has consumed and advanced
        // `next_seq`, so the data record never shares a sequence number with
        // the padding record that preceded it in the ring.
        let record = RawRecord::data(self.next_seq, payload)?;
        let seq = record.sequence;
        self.write_record_at_cursor(backend, &record)?;
        self.write_pos += record_len;
        self.next_seq += 1;

        // Mark the new end-of-live-data; this sentinel is overwritten by
        // the next append.
        if self.remaining_to_ring_end() >= sentinel_len {
            let sentinel = RawRecord::sentinel();
            self.write_record_at_cursor(backend, &sentinel)?;
        }

        trace!(seq, write_pos = self.write_pos, "wal record appended");
        Ok(WalSequence(seq))
    }

    fn maybe_fsync(&mut self, backend: &mut FileBackend, is_commit: bool) -> MvResult<()> {
        let should = match self.policy {
            FsyncPolicy::Always => true,
            FsyncPolicy::OnCommit => is_commit,
            FsyncPolicy::EveryBytes(n) => self.bytes_since_fsync >= n,
        };
        if should {
            backend.fsync().map_err(|e| {
                self.faulted = Some(e.to_string());
                MvError::WriterFaulted {
                    reason: e.to_string(),
                }
            })?;
            self.bytes_since_fsync = 0;
        }
        Ok(())
    }

    /// Record that everything up to the current write position has been
    /// reflected in a committed TOC, clearing WAL-writer-side pending state.
    pub fn record_checkpoint(&mut self) {
        debug!(write_pos = self.write_pos, "wal checkpoint recorded");
        self.checkpoint_pos = self.write_pos;
    }

    /// Next sequence number that will be assigned to the following append.
    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn backend() -> (NamedTempFile, FileBackend) {
        let tmp = NamedTempFile::new().unwrap();
        let mut b = FileBackend::open_existing(tmp.path()).unwrap();
        b.truncate(1 << 20).unwrap();
        (tmp, b)
    }

    #[test]
    fn appends_increment_sequence_and_write_pos() {
        let (_tmp, mut backend) = backend();
        let mut writer = WalWriter::new(8192, 65536, FsyncPolicy::Always);
        let seq1 = writer.append(&mut backend, b"one".to_vec()).unwrap();
        let seq2 = writer.append(&mut backend, b"two".to_vec()).unwrap();
        assert_eq!(seq1.0, 1);
        assert_eq!(seq2.0, 2);
        assert!(writer.write_pos() > 0);
    }

    #[test]
    fn capacity_exceeded_when_ring_too_small() {
        let (_tmp, mut backend) = backend();
        let mut writer = WalWriter::new(8192, 200, FsyncPolicy::Always);
        let big = vec![0u8; 1000];
        assert!(writer.append(&mut backend, big).is_err());
    }

    #[test]
    fn wrap_count_increments_when_a_record_does_not_fit_before_ring_end() {
        let (_tmp, mut backend) = backend();
        // wal_size chosen so the first append leaves under 48+payload bytes
        // free before the ring boundary, forcing a wrap on the second.
        let mut writer = WalWriter::new(8192, 200, FsyncPolicy::Always);
        writer.append(&mut backend, vec![0u8; 60]).unwrap();
        assert_eq!(writer.wrap_count(), 0);
        writer.append(&mut backend, vec![0u8; 60]).unwrap();
        assert_eq!(writer.wrap_count(), 1);
    }

    #[test]
    fn wrapped_ring_stays_decodable_by_the_reader() {
        use crate::entry::Entry;
        use crate::reader::{scan, HaltReason};
        use mv2s_core::ids::FrameId;

        let (_tmp, mut backend) = backend();
        let mut writer = WalWriter::new(8192, 512, FsyncPolicy::Always);
        let mut last = Entry::DeleteFrame { id: FrameId(0) };
        for i in 0..20u64 {
            last = Entry::DeleteFrame { id: FrameId(i) };
            writer.append(&mut backend, last.encode()).unwrap();
            writer.record_checkpoint();
        }
        assert!(writer.wrap_count() > 0);

        let outcome = scan(&mut backend, 8192, 512, writer.checkpoint_pos()).unwrap();
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.state.halt_reason, HaltReason::Sentinel);

        // A pending (uncheckpointed) entry past the wrap is still visible.
        writer.append(&mut backend, last.encode()).unwrap();
        let checkpoint_before = writer.checkpoint_pos();
        let outcome = scan(&mut backend, 8192, 512, checkpoint_before).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].1, last);
    }

    #[test]
    fn wrap_padding_does_not_steal_the_following_data_records_sequence() {
        let (_tmp, mut backend) = backend();
        // Same shape as `wrap_count_increments_...`: the second append's
        // record doesn't fit before the ring boundary, so a padding record
        // is emitted (and consumes a sequence number) before the wrap.
        let mut writer = WalWriter::new(8192, 200, FsyncPolicy::Always);
        writer.append(&mut backend, vec![0u8; 60]).unwrap();
        let next_before = writer.next_sequence();

        let seq = writer.append(&mut backend, vec![0u8; 60]).unwrap();
        assert_eq!(writer.wrap_count(), 1, "this append must trigger a wrap");
        // The padding record consumed `next_before`; the data record must be
        // stamped with the sequence after that, never reusing it.
        assert_eq!(seq.0, next_before + 1);
        assert_eq!(writer.next_sequence(), next_before + 2);
    }

    #[test]
    fn checkpoint_frees_capacity_for_reuse() {
        let (_tmp, mut backend) = backend();
        let mut writer = WalWriter::new(8192, 1024, FsyncPolicy::Always);
        for _ in 0..5 {
            writer.append(&mut backend, vec![0u8; 100]).unwrap();
        }
        writer.record_checkpoint();
        assert_eq!(writer.checkpoint_pos(), writer.write_pos());
        // after checkpoint, more appends should succeed even though the
        // physical write position wraps back around.
        for _ in 0..5 {
            writer.append(&mut backend, vec![0u8; 100]).unwrap();
        }
    }
}
