//! WAL ring reader: scan from a checkpoint position, reconstructing
//! pending entries and halting cleanly on any recognized end condition.

use crate::entry::Entry;
use crate::record::{RawRecord, RECORD_HEADER_SIZE};
use mv2s_core::{ids::WalSequence, MvResult};
use mv2s_storage::FileBackend;
use tracing::warn;

/// Why a scan stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The ring's sentinel record was reached; this is the normal, healthy
    /// end of live data.
    Sentinel,
    /// A record's checksum did not match its payload; scanning stops at the
    /// last known-good record.
    ChecksumMismatch { offset: u64 },
    /// A record header or payload did not fit within the ring's remaining
    /// bytes (truncated write, most likely from a crash mid-append).
    Truncated { offset: u64 },
    /// A record's sequence number did not strictly increase over the
    /// previous record's, meaning a stale record was left behind the write
    /// head by an earlier wrap.
    MonotonicityViolation { offset: u64 },
    /// The scan wrapped back to its start offset without finding a sentinel
    /// (a fully-packed ring with no checkpoint since the last wrap).
    WrappedWithoutSentinel,
}

/// Resumable scan position and bookkeeping needed to construct a
/// [`crate::writer::WalWriter`] that continues exactly where the scan left off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanState {
    /// Ring-relative position just past the last successfully scanned record.
    pub write_pos: u64,
    /// Sequence number the writer should assign to its next append.
    pub next_sequence: u64,
    /// Highest sequence number actually observed (0 if none).
    pub max_sequence_seen: u64,
    /// Why the scan stopped.
    pub halt_reason: HaltReason,
}

/// Result of a full WAL scan: every pending entry found, in sequence order,
/// plus the resulting scan state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// Pending entries, in ascending WAL sequence order.
    pub entries: Vec<(WalSequence, Entry)>,
    /// Resulting scan state.
    pub state: ScanState,
}

/// Scan the ring `[wal_offset, wal_offset + wal_size)` starting at
/// `checkpoint_pos`, decoding data records into [`Entry`] values until a
/// sentinel, corruption, or a second pass over the start offset is reached.
pub fn scan(
    backend: &mut FileBackend,
    wal_offset: u64,
    wal_size: u64,
    checkpoint_pos: u64,
) -> MvResult<ScanOutcome> {
    let mut pos = checkpoint_pos;
    let mut entries = Vec::new();
    let mut max_seq = 0u64;
    let mut prev_seq = 0u64;
    let mut wrapped = false;

    loop {
        if wrapped && pos >= checkpoint_pos {
            return Ok(ScanOutcome {
                entries,
                state: ScanState {
                    write_pos: pos,
                    next_sequence: max_seq + 1,
                    max_sequence_seen: max_seq,
                    halt_reason: HaltReason::WrappedWithoutSentinel,
                },
            });
        }

        if wal_size - pos < RECORD_HEADER_SIZE as u64 {
            pos = 0;
            wrapped = true;
            continue;
        }

        let header_bytes = match backend.read_exactly(wal_offset + pos, RECORD_HEADER_SIZE) {
            Ok(b) => b,
            Err(_) => {
                return Ok(ScanOutcome {
                    entries,
                    state: ScanState {
                        write_pos: pos,
                        next_sequence: max_seq + 1,
                        max_sequence_seen: max_seq,
                        halt_reason: HaltReason::Truncated { offset: pos },
                    },
                })
            }
        };
        let (sequence, length, flags, checksum) = RawRecord::decode_header(&header_bytes)?;

        // A zero sequence is exactly the sentinel per spec (48 zero bytes);
        // data and padding records always carry sequence > 0.
        if sequence == 0 {
            return Ok(ScanOutcome {
                entries,
                state: ScanState {
                    write_pos: pos,
                    next_sequence: max_seq + 1,
                    max_sequence_seen: max_seq,
                    halt_reason: HaltReason::Sentinel,
                },
            });
        }

        if sequence <= prev_seq {
            warn!(
                offset = pos,
                sequence,
                prev_seq,
                "wal sequence did not strictly increase during scan"
            );
            return Ok(ScanOutcome {
                entries,
                state: ScanState {
                    write_pos: pos,
                    next_sequence: max_seq + 1,
                    max_sequence_seen: max_seq,
                    halt_reason: HaltReason::MonotonicityViolation { offset: pos },
                },
            });
        }

        if flags & crate::record::FLAG_IS_PADDING != 0 {
            prev_seq = sequence;
            pos += RECORD_HEADER_SIZE as u64 + length as u64;
            max_seq = max_seq.max(sequence);
            if pos >= wal_size {
                pos = 0;
                wrapped = true;
            }
            continue;
        }

        if length as u64 > wal_size - RECORD_HEADER_SIZE as u64
            || pos + RECORD_HEADER_SIZE as u64 + length as u64 > wal_size
        {
            return Ok(ScanOutcome {
                entries,
                state: ScanState {
                    write_pos: pos,
                    next_sequence: max_seq + 1,
                    max_sequence_seen: max_seq,
                    halt_reason: HaltReason::Truncated { offset: pos },
                },
            });
        }

        let payload = match backend.read_exactly(wal_offset + pos + RECORD_HEADER_SIZE as u64, length as usize) {
            Ok(p) => p,
            Err(_) => {
                return Ok(ScanOutcome {
                    entries,
                    state: ScanState {
                        write_pos: pos,
                        next_sequence: max_seq + 1,
                        max_sequence_seen: max_seq,
                        halt_reason: HaltReason::Truncated { offset: pos },
                    },
                })
            }
        };

        let record = RawRecord {
            sequence,
            length,
            flags,
            checksum,
            payload,
        };
        if !record.verify_payload_checksum() {
            warn!(offset = pos, "wal record checksum mismatch during scan");
            return Ok(ScanOutcome {
                entries,
                state: ScanState {
                    write_pos: pos,
                    next_sequence: max_seq + 1,
                    max_sequence_seen: max_seq,
                    halt_reason: HaltReason::ChecksumMismatch { offset: pos },
                },
            });
        }

        let entry = Entry::decode(&record.payload)?;
        prev_seq = sequence;
        max_seq = max_seq.max(sequence);
        entries.push((WalSequence(sequence), entry));
        pos += RECORD_HEADER_SIZE as u64 + length as u64;
        if pos >= wal_size {
            pos = 0;
            wrapped = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsyncPolicy;
    use crate::writer::WalWriter;
    use mv2s_core::ids::FrameId;
    use tempfile::NamedTempFile;

    fn backend() -> (NamedTempFile, FileBackend) {
        let tmp = NamedTempFile::new().unwrap();
        let mut b = FileBackend::open_existing(tmp.path()).unwrap();
        b.truncate(1 << 20).unwrap();
        (tmp, b)
    }

    #[test]
    fn scan_recovers_appended_entries_in_order() {
        let (_tmp, mut backend) = backend();
        let mut writer = WalWriter::new(8192, 65536, FsyncPolicy::Always);

        let e1 = Entry::DeleteFrame { id: FrameId(1) };
        let e2 = Entry::SupersedeFrame {
            a: FrameId(1),
            b: FrameId(2),
        };
        writer.append(&mut backend, e1.encode()).unwrap();
        writer.append(&mut backend, e2.encode()).unwrap();

        let outcome = scan(&mut backend, 8192, 65536, 0).unwrap();
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.entries[0].1, e1);
        assert_eq!(outcome.entries[1].1, e2);
        assert_eq!(outcome.state.halt_reason, HaltReason::Sentinel);
    }

    #[test]
    fn scan_halts_on_a_non_increasing_sequence() {
        let (_tmp, mut backend) = backend();
        // Craft two records directly: a valid one at sequence 5, followed by
        // a stale one at sequence 3 — as would be left behind the write head
        // by an earlier wrap that never got overwritten.
        let first = RawRecord::data(5, Entry::DeleteFrame { id: FrameId(1) }.encode()).unwrap();
        let stale = RawRecord::data(3, Entry::DeleteFrame { id: FrameId(2) }.encode()).unwrap();
        backend.write_all_at(8192, &first.encode()).unwrap();
        backend.write_all_at(8192 + first.on_disk_len(), &stale.encode()).unwrap();

        let outcome = scan(&mut backend, 8192, 65536, 0).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].0 .0, 5);
        assert!(matches!(
            outcome.state.halt_reason,
            HaltReason::MonotonicityViolation { .. }
        ));
    }

    #[test]
    fn scan_from_checkpoint_skips_already_committed_entries() {
        let (_tmp, mut backend) = backend();
        let mut writer = WalWriter::new(8192, 65536, FsyncPolicy::Always);
        writer
            .append(&mut backend, Entry::DeleteFrame { id: FrameId(1) }.encode())
            .unwrap();
        writer.record_checkpoint();
        let checkpoint = writer.checkpoint_pos();
        writer
            .append(&mut backend, Entry::DeleteFrame { id: FrameId(2) }.encode())
            .unwrap();

        let outcome = scan(&mut backend, 8192, 65536, checkpoint).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].1, Entry::DeleteFrame { id: FrameId(2) });
    }
}
