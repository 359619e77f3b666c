//! The lex index engine: a single embedded relational blob holding both
//! full-text search tables and the structured-memory schema.
//!
//! The whole engine serializes to a blob that the store actor stages and
//! commits alongside the rest of the container, built on `rusqlite`'s
//! bundled SQLite + FTS5 feature set. Schema and query shapes are built
//! from the data model in `mv2s_core::memory` plus ordinary `rusqlite`
//! idiom.

use mv2s_core::{
    canon::{canonical_fold, fact_digest, span_key_digest},
    ids::{EntityId, FactId, PredicateId, SpanId},
    memory::{AsOf, BitemporalSpan, Entity, Fact, ObjectValue},
    FrameId, MvError, MvResult,
};
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite `application_id` pragma value tagging an mv2s lex blob: the ASCII
/// bytes `"MV2S"`.
const APPLICATION_ID: i32 = 0x4d56_3253;

/// Current structured-memory schema version. A blob opened with
/// `user_version == 0` is legacy-untagged and is upgraded in place rather
/// than rejected.
const SCHEMA_VERSION: i32 = 1;

/// How many pending full-text insertions accumulate before an automatic
/// flush. Flushed in a single transaction when either this threshold is
/// crossed or before any read.
const FTS_FLUSH_THRESHOLD: usize = 256;

const SCHEMA_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS frames_fts USING fts5(search_text);

CREATE TABLE IF NOT EXISTS frame_mapping (
    frame_id INTEGER PRIMARY KEY,
    fts_rowid INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sm_entity (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    kind TEXT,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sm_entity_alias (
    entity_id INTEGER NOT NULL REFERENCES sm_entity(id),
    alias TEXT NOT NULL,
    alias_norm TEXT NOT NULL,
    PRIMARY KEY (entity_id, alias_norm)
);
CREATE INDEX IF NOT EXISTS sm_entity_alias_norm_idx ON sm_entity_alias(alias_norm);

CREATE TABLE IF NOT EXISTS sm_predicate (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sm_fact (
    id INTEGER PRIMARY KEY,
    fact_hash BLOB NOT NULL UNIQUE,
    subject_id INTEGER NOT NULL REFERENCES sm_entity(id),
    predicate_id INTEGER NOT NULL REFERENCES sm_predicate(id),
    object_kind TEXT NOT NULL,
    object_str TEXT,
    object_int INTEGER,
    object_float REAL,
    object_bool INTEGER,
    object_bytes BLOB,
    object_time_ms INTEGER,
    object_entity_ref INTEGER,
    CHECK (
        (object_kind = 'string' AND object_str IS NOT NULL) OR
        (object_kind = 'int' AND object_int IS NOT NULL) OR
        (object_kind = 'float' AND object_float IS NOT NULL) OR
        (object_kind = 'bool' AND object_bool IS NOT NULL) OR
        (object_kind = 'bytes' AND object_bytes IS NOT NULL) OR
        (object_kind = 'time' AND object_time_ms IS NOT NULL) OR
        (object_kind = 'entity_ref' AND object_entity_ref IS NOT NULL)
    )
);
CREATE INDEX IF NOT EXISTS sm_fact_subject_idx ON sm_fact(subject_id);
CREATE INDEX IF NOT EXISTS sm_fact_predicate_idx ON sm_fact(predicate_id);

CREATE TABLE IF NOT EXISTS sm_fact_span (
    id INTEGER PRIMARY KEY,
    span_key_hash BLOB NOT NULL UNIQUE,
    fact_id INTEGER NOT NULL REFERENCES sm_fact(id),
    valid_from_ms INTEGER NOT NULL,
    valid_to_ms INTEGER,
    system_from_ms INTEGER NOT NULL,
    system_to_ms INTEGER,
    CHECK (valid_to_ms IS NULL OR valid_to_ms > valid_from_ms),
    CHECK (system_to_ms IS NULL OR system_to_ms > system_from_ms)
);
CREATE INDEX IF NOT EXISTS sm_fact_span_fact_idx ON sm_fact_span(fact_id);

CREATE TABLE IF NOT EXISTS sm_evidence (
    id INTEGER PRIMARY KEY,
    span_id INTEGER REFERENCES sm_fact_span(id),
    fact_id INTEGER REFERENCES sm_fact(id),
    source_frame_id INTEGER NOT NULL,
    chunk_index INTEGER,
    span_text TEXT,
    extractor_id TEXT NOT NULL,
    extractor_version TEXT NOT NULL,
    confidence REAL,
    asserted_at_ms INTEGER NOT NULL,
    CHECK ((span_id IS NOT NULL) != (fact_id IS NOT NULL))
);
CREATE INDEX IF NOT EXISTS sm_evidence_frame_idx ON sm_evidence(source_frame_id);
CREATE INDEX IF NOT EXISTS sm_evidence_fact_idx ON sm_evidence(fact_id);
CREATE INDEX IF NOT EXISTS sm_evidence_span_idx ON sm_evidence(span_id);
";

/// Evidence supplied alongside `LexIndex::assert_fact`.
#[derive(Debug, Clone)]
pub struct EvidenceInput {
    /// Frame the fact/span was extracted from.
    pub source_frame_id: FrameId,
    /// Optional chunk index within that frame.
    pub chunk_index: Option<u32>,
    /// Optional extracted text span.
    pub span_text: Option<String>,
    /// Extractor identifier.
    pub extractor_id: String,
    /// Extractor version.
    pub extractor_version: String,
    /// Optional confidence in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Assertion time, milliseconds since epoch.
    pub asserted_at_ms: i64,
}

/// One row of `LexIndex::facts`: a fact joined with its visible span.
#[derive(Debug, Clone)]
pub struct FactRecord {
    /// The fact itself.
    pub fact: Fact,
    /// Subject entity key (denormalized for convenience).
    pub subject_key: String,
    /// Predicate key (denormalized for convenience).
    pub predicate_key: String,
    /// The span that made this fact visible at the query's `as_of`.
    pub span: BitemporalSpan,
}

/// Result of `LexIndex::facts`: possibly-truncated fact rows.
#[derive(Debug, Clone)]
pub struct FactsResult {
    /// Matching, visible facts, deterministically ordered and capped.
    pub facts: Vec<FactRecord>,
    /// True if more facts matched than the effective limit allowed.
    pub was_truncated: bool,
}

/// One FTS hit: frame id, BM25-derived score (higher is better), and an
/// optional snippet.
#[derive(Debug, Clone)]
pub struct TextHit {
    /// The matched frame.
    pub frame_id: FrameId,
    /// Higher-is-better relevance score.
    pub score: f32,
    /// Optional bounded snippet around the match.
    pub snippet: Option<String>,
}

/// The lex index engine: FTS5 over frame search text, plus the
/// structured-memory schema, all inside one SQLite database held in memory
/// and (de)serialized as an opaque blob for staging/commit.
pub struct LexIndex {
    conn: Connection,
    pending_fts: Vec<(FrameId, String)>,
}

impl LexIndex {
    /// Construct a fresh, empty lex index.
    pub fn open_empty() -> MvResult<Self> {
        let conn = Connection::open_in_memory().map_err(rusqlite_err)?;
        Self::init_schema(&conn)?;
        Ok(LexIndex {
            conn,
            pending_fts: Vec::new(),
        })
    }

    fn init_schema(conn: &Connection) -> MvResult<()> {
        conn.pragma_update(None, "application_id", APPLICATION_ID)
            .map_err(rusqlite_err)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(rusqlite_err)?;
        conn.pragma_update(None, "foreign_keys", true).map_err(rusqlite_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(rusqlite_err)
    }

    /// Decode a blob produced by [`Self::serialize`]. A blob whose
    /// `user_version` is `0` (legacy/untagged) is accepted and upgraded in
    /// place; any other non-matching version is rejected.
    pub fn deserialize(bytes: &[u8]) -> MvResult<Self> {
        let tmp = tempfile::NamedTempFile::new().map_err(MvError::Io)?;
        std::fs::write(tmp.path(), bytes).map_err(MvError::Io)?;
        let source = Connection::open(tmp.path()).map_err(rusqlite_err)?;

        let application_id: i32 = source
            .pragma_query_value(None, "application_id", |r| r.get(0))
            .map_err(rusqlite_err)?;
        let user_version: i32 = source
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .map_err(rusqlite_err)?;
        if application_id != 0 && application_id != APPLICATION_ID {
            return Err(MvError::DecodingError {
                reason: format!("lex blob has foreign application_id {application_id:#x}"),
            });
        }
        if user_version != 0 && user_version != SCHEMA_VERSION {
            return Err(MvError::DecodingError {
                reason: format!("lex blob schema version {user_version} is not supported"),
            });
        }

        let mut conn = Connection::open_in_memory().map_err(rusqlite_err)?;
        {
            let backup =
                rusqlite::backup::Backup::new(&source, &mut conn).map_err(rusqlite_err)?;
            backup
                .run_to_completion(5, std::time::Duration::from_millis(50), None)
                .map_err(rusqlite_err)?;
        }
        conn.pragma_update(None, "foreign_keys", true).map_err(rusqlite_err)?;
        if user_version == 0 {
            conn.pragma_update(None, "application_id", APPLICATION_ID)
                .map_err(rusqlite_err)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(rusqlite_err)?;
        }

        Ok(LexIndex {
            conn,
            pending_fts: Vec::new(),
        })
    }

    /// Encode the current state (after flushing pending indexing ops) as an
    /// opaque blob suitable for `Store::stage_lex_index_for_next_commit`.
    pub fn serialize(&mut self, compact: bool) -> MvResult<Vec<u8>> {
        self.flush()?;
        if compact {
            self.conn.execute_batch("VACUUM;").map_err(rusqlite_err)?;
        }

        let tmp = tempfile::NamedTempFile::new().map_err(MvError::Io)?;
        // Truncate: `Connection::open` on an existing empty file reuses it.
        std::fs::remove_file(tmp.path()).ok();
        let mut dest = Connection::open(tmp.path()).map_err(rusqlite_err)?;
        {
            let backup =
                rusqlite::backup::Backup::new(&self.conn, &mut dest).map_err(rusqlite_err)?;
            backup
                .run_to_completion(5, std::time::Duration::from_millis(50), None)
                .map_err(rusqlite_err)?;
        }
        drop(dest);
        std::fs::read(tmp.path()).map_err(MvError::Io)
    }

    /// Number of documents indexed into the FTS table, including pending
    /// (unflushed) ones.
    pub fn doc_count(&self) -> MvResult<u64> {
        let committed: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM frame_mapping", [], |r| r.get(0))
            .map_err(rusqlite_err)?;
        Ok(committed as u64 + self.pending_fts.len() as u64)
    }

    /// Queue `search_text` for indexing under `frame_id`, replacing any
    /// previously queued or committed text for the same frame. Flushes
    /// automatically once [`FTS_FLUSH_THRESHOLD`] entries are pending.
    pub fn index_frame_text(&mut self, frame_id: FrameId, search_text: impl Into<String>) -> MvResult<()> {
        self.pending_fts.push((frame_id, search_text.into()));
        if self.pending_fts.len() >= FTS_FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush queued full-text insertions in a single transaction. A no-op
    /// when nothing is pending.
    pub fn flush(&mut self) -> MvResult<()> {
        if self.pending_fts.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction().map_err(rusqlite_err)?;
        for (frame_id, text) in self.pending_fts.drain(..) {
            tx.execute(
                "DELETE FROM frames_fts WHERE rowid = (SELECT fts_rowid FROM frame_mapping WHERE frame_id = ?1)",
                params![frame_id.get() as i64],
            )
            .map_err(rusqlite_err)?;
            tx.execute(
                "INSERT INTO frames_fts(rowid, search_text) VALUES (?1, ?2)",
                params![frame_id.get() as i64, text],
            )
            .map_err(rusqlite_err)?;
            tx.execute(
                "INSERT INTO frame_mapping(frame_id, fts_rowid) VALUES (?1, ?1)
                 ON CONFLICT(frame_id) DO UPDATE SET fts_rowid = excluded.fts_rowid",
                params![frame_id.get() as i64],
            )
            .map_err(rusqlite_err)?;
        }
        tx.commit().map_err(rusqlite_err)
    }

    /// Run an FTS5 `MATCH` query, ranked by BM25 (higher score is better;
    /// BM25 itself is lower-is-better, so the sign is flipped), capped at
    /// `limit`.
    pub fn query_fts(&mut self, query: &str, limit: usize) -> MvResult<Vec<TextHit>> {
        self.flush()?;
        let limit = limit.clamp(1, mv2s_core::limits::MAX_TOP_K);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT rowid, bm25(frames_fts) AS rank,
                        snippet(frames_fts, 0, '[', ']', '…', 10)
                 FROM frames_fts
                 WHERE frames_fts MATCH ?1
                 ORDER BY rank ASC, rowid ASC
                 LIMIT ?2",
            )
            .map_err(rusqlite_err)?;
        let rows = stmt
            .query_map(params![query, limit as i64], |row| {
                let rowid: i64 = row.get(0)?;
                let bm25: f64 = row.get(1)?;
                let snippet: Option<String> = row.get(2)?;
                Ok((rowid, bm25, snippet))
            })
            .map_err(rusqlite_err)?;

        let mut hits = Vec::new();
        for row in rows {
            let (rowid, bm25, snippet) = row.map_err(rusqlite_err)?;
            hits.push(TextHit {
                frame_id: FrameId(rowid as u64),
                score: -(bm25 as f32),
                snippet,
            });
        }
        Ok(hits)
    }

    /// Create an entity if absent, or merge `kind`/`aliases` into an
    /// existing one. `kind` only ever fills a previously-unset value.
    pub fn upsert_entity(
        &mut self,
        key: &str,
        kind: Option<&str>,
        aliases: &[String],
        now_ms: i64,
    ) -> MvResult<EntityId> {
        self.flush()?;
        let tx = self.conn.transaction().map_err(rusqlite_err)?;
        tx.execute(
            "INSERT INTO sm_entity(key, kind, created_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET kind = COALESCE(sm_entity.kind, excluded.kind)",
            params![key, kind, now_ms],
        )
        .map_err(rusqlite_err)?;
        let entity_id: i64 = tx
            .query_row("SELECT id FROM sm_entity WHERE key = ?1", params![key], |r| r.get(0))
            .map_err(rusqlite_err)?;
        for alias in aliases {
            let alias_norm = canonical_fold(alias);
            tx.execute(
                "INSERT OR IGNORE INTO sm_entity_alias(entity_id, alias, alias_norm) VALUES (?1, ?2, ?3)",
                params![entity_id, alias, alias_norm],
            )
            .map_err(rusqlite_err)?;
        }
        tx.commit().map_err(rusqlite_err)?;
        Ok(EntityId(entity_id as u64))
    }

    /// Resolve entities whose alias (normalized) or key matches `alias`,
    /// ordered by key ascending, capped at `limit`.
    pub fn resolve_entities(&mut self, alias: &str, limit: usize) -> MvResult<Vec<Entity>> {
        self.flush()?;
        let norm = canonical_fold(alias);
        let limit = limit.clamp(1, mv2s_core::limits::MAX_TOP_K);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT e.id, e.key, e.kind, e.created_at_ms
                 FROM sm_entity e
                 LEFT JOIN sm_entity_alias a ON a.entity_id = e.id
                 WHERE a.alias_norm = ?1 OR e.key = ?2
                 ORDER BY e.key ASC
                 LIMIT ?3",
            )
            .map_err(rusqlite_err)?;
        let rows = stmt
            .query_map(params![norm, alias, limit as i64], |row| {
                Ok(Entity {
                    id: EntityId(row.get::<_, i64>(0)? as u64),
                    key: row.get(1)?,
                    kind: row.get(2)?,
                    created_at_ms: row.get(3)?,
                })
            })
            .map_err(rusqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rusqlite_err)
    }

    fn upsert_predicate(tx: &rusqlite::Transaction<'_>, key: &str, now_ms: i64) -> MvResult<PredicateId> {
        tx.execute(
            "INSERT OR IGNORE INTO sm_predicate(key, created_at_ms) VALUES (?1, ?2)",
            params![key, now_ms],
        )
        .map_err(rusqlite_err)?;
        let id: i64 = tx
            .query_row("SELECT id FROM sm_predicate WHERE key = ?1", params![key], |r| r.get(0))
            .map_err(rusqlite_err)?;
        Ok(PredicateId(id as u64))
    }

    /// Assert a fact, deduplicating by `fact_hash`, and open (or reuse) a
    /// bitemporal span for it, attaching `evidence` rows.
    ///
    /// `subject_key` must already have been created with
    /// [`Self::upsert_entity`]; this mirrors foreign-key enforcement on
    /// `sm_fact.subject_id`.
    pub fn assert_fact(
        &mut self,
        subject_key: &str,
        predicate_key: &str,
        object: ObjectValue,
        valid_from_ms: i64,
        valid_to_ms: Option<i64>,
        system_from_ms: i64,
        evidence: &[EvidenceInput],
    ) -> MvResult<(FactId, SpanId)> {
        if let Some(vt) = valid_to_ms {
            if vt <= valid_from_ms {
                return Err(MvError::InvalidArgument(
                    "valid_to must be greater than valid_from".into(),
                ));
            }
        }
        self.flush()?;
        let tx = self.conn.transaction().map_err(rusqlite_err)?;

        let subject_id: i64 = tx
            .query_row(
                "SELECT id FROM sm_entity WHERE key = ?1",
                params![subject_key],
                |r| r.get(0),
            )
            .optional()
            .map_err(rusqlite_err)?
            .ok_or_else(|| MvError::InvalidArgument(format!("unknown subject entity {subject_key}")))?;

        let predicate_id = Self::upsert_predicate(&tx, predicate_key, system_from_ms)?;

        let hash = fact_digest(subject_key, predicate_key, &object);
        let (kind, str_v, int_v, float_v, bool_v, bytes_v, time_v, ref_v) = split_object(&object);
        tx.execute(
            "INSERT INTO sm_fact(
                fact_hash, subject_id, predicate_id, object_kind,
                object_str, object_int, object_float, object_bool,
                object_bytes, object_time_ms, object_entity_ref
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(fact_hash) DO NOTHING",
            params![
                hash.to_vec(),
                subject_id,
                predicate_id.get() as i64,
                kind,
                str_v,
                int_v,
                float_v,
                bool_v,
                bytes_v,
                time_v,
                ref_v
            ],
        )
        .map_err(rusqlite_err)?;
        let fact_id: i64 = tx
            .query_row(
                "SELECT id FROM sm_fact WHERE fact_hash = ?1",
                params![hash.to_vec()],
                |r| r.get(0),
            )
            .map_err(rusqlite_err)?;

        let span_hash = span_key_digest(fact_id as u64, valid_from_ms, valid_to_ms, system_from_ms);
        tx.execute(
            "INSERT INTO sm_fact_span(
                span_key_hash, fact_id, valid_from_ms, valid_to_ms, system_from_ms, system_to_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, NULL)
             ON CONFLICT(span_key_hash) DO NOTHING",
            params![span_hash.to_vec(), fact_id, valid_from_ms, valid_to_ms, system_from_ms],
        )
        .map_err(rusqlite_err)?;
        let span_id: i64 = tx
            .query_row(
                "SELECT id FROM sm_fact_span WHERE span_key_hash = ?1",
                params![span_hash.to_vec()],
                |r| r.get(0),
            )
            .map_err(rusqlite_err)?;

        for ev in evidence {
            tx.execute(
                "INSERT INTO sm_evidence(
                    span_id, fact_id, source_frame_id, chunk_index, span_text,
                    extractor_id, extractor_version, confidence, asserted_at_ms
                 ) VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    span_id,
                    ev.source_frame_id.get() as i64,
                    ev.chunk_index,
                    ev.span_text,
                    ev.extractor_id,
                    ev.extractor_version,
                    ev.confidence,
                    ev.asserted_at_ms,
                ],
            )
            .map_err(rusqlite_err)?;
        }

        tx.commit().map_err(rusqlite_err)?;
        Ok((FactId(fact_id as u64), SpanId(span_id as u64)))
    }

    /// Close every currently-open span of `fact_id` at `at_ms`. A no-op if
    /// the fact has no open spans (idempotent).
    pub fn retract_fact(&mut self, fact_id: FactId, at_ms: i64) -> MvResult<()> {
        self.flush()?;
        let violating: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sm_fact_span
                 WHERE fact_id = ?1 AND system_to_ms IS NULL AND system_from_ms >= ?2",
                params![fact_id.get() as i64, at_ms],
                |r| r.get(0),
            )
            .map_err(rusqlite_err)?;
        if violating > 0 {
            return Err(MvError::InvalidArgument(
                "retraction time must be after the span's system_from".into(),
            ));
        }
        self.conn
            .execute(
                "UPDATE sm_fact_span SET system_to_ms = ?1
                 WHERE fact_id = ?2 AND system_to_ms IS NULL",
                params![at_ms, fact_id.get() as i64],
            )
            .map_err(rusqlite_err)?;
        Ok(())
    }

    /// Facts visible at `as_of`, optionally filtered by subject/predicate
    /// key, deterministically ordered by `(predicate_key ASC, object_kind
    /// ASC, canonical_object ASC, valid_from DESC, fact_id ASC)` and capped
    /// at `min(limit, MAX_FACTS_RESULT)`.
    pub fn facts(
        &mut self,
        subject_key: Option<&str>,
        predicate_key: Option<&str>,
        as_of: AsOf,
        limit: usize,
    ) -> MvResult<FactsResult> {
        self.flush()?;
        let effective_limit = limit.clamp(1, mv2s_core::limits::MAX_FACTS_RESULT);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT f.id, e.key, p.key, f.object_kind,
                        f.object_str, f.object_int, f.object_float, f.object_bool,
                        f.object_bytes, f.object_time_ms, f.object_entity_ref, f.fact_hash,
                        s.id, s.valid_from_ms, s.valid_to_ms, s.system_from_ms, s.system_to_ms,
                        e.id AS subject_id, p.id AS predicate_id
                 FROM sm_fact_span s
                 JOIN sm_fact f ON f.id = s.fact_id
                 JOIN sm_entity e ON e.id = f.subject_id
                 JOIN sm_predicate p ON p.id = f.predicate_id
                 WHERE (?1 IS NULL OR e.key = ?1)
                   AND (?2 IS NULL OR p.key = ?2)
                   AND s.system_from_ms <= ?3
                   AND (s.system_to_ms IS NULL OR ?3 < s.system_to_ms)
                   AND s.valid_from_ms <= ?4
                   AND (s.valid_to_ms IS NULL OR ?4 < s.valid_to_ms)",
            )
            .map_err(rusqlite_err)?;

        let rows = stmt
            .query_map(
                params![subject_key, predicate_key, as_of.system_ms, as_of.valid_ms],
                |row| {
                    let subject_key: String = row.get(1)?;
                    let predicate_key: String = row.get(2)?;
                    let object = row_to_object(row)?;
                    let mut hash = [0u8; 32];
                    let hash_vec: Vec<u8> = row.get(11)?;
                    hash.copy_from_slice(&hash_vec);
                    let fact = Fact {
                        id: FactId(row.get::<_, i64>(0)? as u64),
                        subject: EntityId(row.get::<_, i64>(17)? as u64),
                        predicate: PredicateId(row.get::<_, i64>(18)? as u64),
                        object,
                        fact_hash: hash,
                    };
                    let span = BitemporalSpan {
                        id: SpanId(row.get::<_, i64>(12)? as u64),
                        fact_id: fact.id,
                        valid_from_ms: row.get(13)?,
                        valid_to_ms: row.get(14)?,
                        system_from_ms: row.get(15)?,
                        system_to_ms: row.get(16)?,
                    };
                    Ok(FactRecord {
                        fact,
                        subject_key,
                        predicate_key,
                        span,
                    })
                },
            )
            .map_err(rusqlite_err)?;

        let mut all: Vec<FactRecord> = rows.collect::<Result<_, _>>().map_err(rusqlite_err)?;
        all.sort_by(|a, b| {
            a.predicate_key
                .cmp(&b.predicate_key)
                .then_with(|| a.fact.object.kind_name().cmp(b.fact.object.kind_name()))
                .then_with(|| a.fact.object.canonical_sort_key().cmp(&b.fact.object.canonical_sort_key()))
                .then_with(|| b.span.valid_from_ms.cmp(&a.span.valid_from_ms))
                .then_with(|| a.fact.id.get().cmp(&b.fact.id.get()))
        });

        let was_truncated = all.len() > effective_limit;
        all.truncate(effective_limit);
        Ok(FactsResult {
            facts: all,
            was_truncated,
        })
    }

    /// Rank source frames by the structured-memory evidence they contribute
    /// for any of `subject_keys`, visible at `as_of`. Ranking follows
    /// `(max(confidence) DESC nulls-last, max(asserted_at) DESC,
    /// count(distinct fact_id) DESC, source_frame_id ASC)`, capped at
    /// `max_frames`.
    pub fn evidence_frame_ids(
        &mut self,
        subject_keys: &[String],
        as_of: AsOf,
        max_facts: usize,
        max_frames: usize,
        require_evidence_span: bool,
    ) -> MvResult<Vec<(FrameId, f32)>> {
        self.flush()?;
        if subject_keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = subject_keys.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT DISTINCT f.id
             FROM sm_fact_span s
             JOIN sm_fact f ON f.id = s.fact_id
             JOIN sm_entity e ON e.id = f.subject_id
             WHERE e.key IN ({placeholders})
               AND s.system_from_ms <= ?{p1}
               AND (s.system_to_ms IS NULL OR ?{p1} < s.system_to_ms)
               AND s.valid_from_ms <= ?{p2}
               AND (s.valid_to_ms IS NULL OR ?{p2} < s.valid_to_ms)
             ORDER BY f.id ASC
             LIMIT ?{p3}",
            p1 = subject_keys.len() + 1,
            p2 = subject_keys.len() + 2,
            p3 = subject_keys.len() + 3,
        );
        let mut stmt = self.conn.prepare(&sql).map_err(rusqlite_err)?;
        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> =
            subject_keys.iter().map(|k| Box::new(k.clone()) as Box<dyn rusqlite::ToSql>).collect();
        query_params.push(Box::new(as_of.system_ms));
        query_params.push(Box::new(as_of.valid_ms));
        query_params.push(Box::new(max_facts.clamp(1, mv2s_core::limits::MAX_FACTS_RESULT) as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = query_params.iter().map(|b| b.as_ref()).collect();

        let fact_ids: Vec<i64> = stmt
            .query_map(param_refs.as_slice(), |row| row.get(0))
            .map_err(rusqlite_err)?
            .collect::<Result<_, _>>()
            .map_err(rusqlite_err)?;
        if fact_ids.is_empty() {
            return Ok(Vec::new());
        }

        let fact_placeholders = fact_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let span_filter = if require_evidence_span {
            "AND ev.span_id IS NOT NULL"
        } else {
            ""
        };
        let evidence_sql = format!(
            "SELECT ev.source_frame_id, MAX(ev.confidence), MAX(ev.asserted_at_ms),
                    COUNT(DISTINCT COALESCE(ev.fact_id, sp.fact_id))
             FROM sm_evidence ev
             LEFT JOIN sm_fact_span sp ON sp.id = ev.span_id
             WHERE COALESCE(ev.fact_id, sp.fact_id) IN ({fact_placeholders}) {span_filter}
             GROUP BY ev.source_frame_id
             ORDER BY MAX(ev.confidence) IS NULL ASC, MAX(ev.confidence) DESC,
                      MAX(ev.asserted_at_ms) DESC,
                      COUNT(DISTINCT COALESCE(ev.fact_id, sp.fact_id)) DESC,
                      ev.source_frame_id ASC
             LIMIT ?{next}",
            next = fact_ids.len() + 1,
        );
        let mut ev_stmt = self.conn.prepare(&evidence_sql).map_err(rusqlite_err)?;
        let mut ev_params: Vec<Box<dyn rusqlite::ToSql>> =
            fact_ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>).collect();
        ev_params.push(Box::new(max_frames.clamp(1, mv2s_core::limits::MAX_TOP_K) as i64));
        let ev_param_refs: Vec<&dyn rusqlite::ToSql> = ev_params.iter().map(|b| b.as_ref()).collect();

        let rows = ev_stmt
            .query_map(ev_param_refs.as_slice(), |row| {
                let frame_id: i64 = row.get(0)?;
                Ok(FrameId(frame_id as u64))
            })
            .map_err(rusqlite_err)?;

        let mut out = Vec::new();
        for (rank, row) in rows.enumerate() {
            let frame_id = row.map_err(rusqlite_err)?;
            // Ranking is fully decided by the ORDER BY above; the returned
            // score is a monotonic stand-in so the fuser can treat this lane
            // like any other ranked lane.
            let score = 1.0 - (rank as f32) * 1e-4;
            out.push((frame_id, score));
        }
        Ok(out)
    }
}

fn split_object(
    object: &ObjectValue,
) -> (
    &'static str,
    Option<String>,
    Option<i64>,
    Option<f64>,
    Option<i64>,
    Option<Vec<u8>>,
    Option<i64>,
    Option<i64>,
) {
    match object {
        ObjectValue::Str(s) => ("string", Some(s.clone()), None, None, None, None, None, None),
        ObjectValue::Int(i) => ("int", None, Some(*i), None, None, None, None, None),
        ObjectValue::Float(f) => ("float", None, None, Some(*f), None, None, None, None),
        ObjectValue::Bool(b) => ("bool", None, None, None, Some(*b as i64), None, None, None),
        ObjectValue::Bytes(b) => ("bytes", None, None, None, None, Some(b.clone()), None, None),
        ObjectValue::TimeMs(t) => ("time", None, None, None, None, None, Some(*t), None),
        ObjectValue::EntityRef(e) => ("entity_ref", None, None, None, None, None, None, Some(e.get() as i64)),
    }
}

fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectValue> {
    let kind: String = row.get(3)?;
    Ok(match kind.as_str() {
        "string" => ObjectValue::Str(row.get(4)?),
        "int" => ObjectValue::Int(row.get(5)?),
        "float" => ObjectValue::Float(row.get(6)?),
        "bool" => ObjectValue::Bool(row.get::<_, i64>(7)? != 0),
        "bytes" => ObjectValue::Bytes(row.get(8)?),
        "time" => ObjectValue::TimeMs(row.get(9)?),
        "entity_ref" => ObjectValue::EntityRef(EntityId(row.get::<_, i64>(10)? as u64)),
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                3,
                format!("unknown object_kind {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    })
}

fn rusqlite_err(e: rusqlite::Error) -> MvError {
    MvError::DecodingError {
        reason: format!("lex index: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_setup(idx: &mut LexIndex) {
        idx.upsert_entity("u:alice", Some("person"), &["Alice".into()], 1000).unwrap();
        idx.upsert_entity("u:bob", Some("person"), &[], 1000).unwrap();
    }

    #[test]
    fn indexes_and_queries_full_text() {
        let mut idx = LexIndex::open_empty().unwrap();
        idx.index_frame_text(FrameId(1), "the quick brown fox").unwrap();
        idx.index_frame_text(FrameId(2), "lazy dogs sleep all day").unwrap();
        let hits = idx.query_fts("fox", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].frame_id, FrameId(1));
    }

    #[test]
    fn reindexing_a_frame_replaces_its_text() {
        let mut idx = LexIndex::open_empty().unwrap();
        idx.index_frame_text(FrameId(1), "alpha").unwrap();
        idx.index_frame_text(FrameId(1), "beta").unwrap();
        assert!(idx.query_fts("alpha", 10).unwrap().is_empty());
        assert_eq!(idx.query_fts("beta", 10).unwrap().len(), 1);
    }

    #[test]
    fn upsert_entity_is_idempotent_and_merges_aliases() {
        let mut idx = LexIndex::open_empty().unwrap();
        let a = idx.upsert_entity("u:alice", None, &["Ally".into()], 1000).unwrap();
        let b = idx.upsert_entity("u:alice", Some("person"), &["Alice".into()], 2000).unwrap();
        assert_eq!(a, b);
        let resolved = idx.resolve_entities("ally", 10).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind.as_deref(), Some("person"));
    }

    #[test]
    fn assert_fact_dedupes_by_hash_and_opens_a_span() {
        let mut idx = LexIndex::open_empty().unwrap();
        entity_setup(&mut idx);
        let (fact_id, _) = idx
            .assert_fact(
                "u:alice",
                "email",
                ObjectValue::Str("a@x.com".into()),
                0,
                None,
                0,
                &[],
            )
            .unwrap();
        let (fact_id_2, _) = idx
            .assert_fact(
                "u:alice",
                "email",
                ObjectValue::Str("a@x.com".into()),
                0,
                None,
                0,
                &[],
            )
            .unwrap();
        assert_eq!(fact_id, fact_id_2);
    }

    #[test]
    fn facts_respects_as_of_visibility() {
        let mut idx = LexIndex::open_empty().unwrap();
        entity_setup(&mut idx);
        idx.assert_fact(
            "u:alice",
            "title",
            ObjectValue::Str("engineer".into()),
            0,
            None,
            100,
            &[],
        )
        .unwrap();

        let before = idx.facts(Some("u:alice"), None, AsOf::at(50), 10).unwrap();
        assert!(before.facts.is_empty());

        let after = idx.facts(Some("u:alice"), None, AsOf::at(200), 10).unwrap();
        assert_eq!(after.facts.len(), 1);
    }

    #[test]
    fn retract_fact_closes_the_span() {
        let mut idx = LexIndex::open_empty().unwrap();
        entity_setup(&mut idx);
        let (fact_id, _) = idx
            .assert_fact(
                "u:alice",
                "title",
                ObjectValue::Str("engineer".into()),
                0,
                None,
                0,
                &[],
            )
            .unwrap();
        idx.retract_fact(fact_id, 500).unwrap();

        let live = idx.facts(Some("u:alice"), None, AsOf::at(600), 10).unwrap();
        assert!(live.facts.is_empty());
        let historical = idx.facts(Some("u:alice"), None, AsOf::at(200), 10).unwrap();
        assert_eq!(historical.facts.len(), 1);
    }

    #[test]
    fn evidence_frame_ids_ranks_by_confidence_then_recency() {
        let mut idx = LexIndex::open_empty().unwrap();
        entity_setup(&mut idx);
        idx.assert_fact(
            "u:alice",
            "title",
            ObjectValue::Str("engineer".into()),
            0,
            None,
            0,
            &[EvidenceInput {
                source_frame_id: FrameId(7),
                chunk_index: None,
                span_text: None,
                extractor_id: "x".into(),
                extractor_version: "1".into(),
                confidence: Some(0.9),
                asserted_at_ms: 10,
            }],
        )
        .unwrap();
        idx.assert_fact(
            "u:alice",
            "team",
            ObjectValue::Str("platform".into()),
            0,
            None,
            0,
            &[EvidenceInput {
                source_frame_id: FrameId(8),
                chunk_index: None,
                span_text: None,
                extractor_id: "x".into(),
                extractor_version: "1".into(),
                confidence: Some(0.5),
                asserted_at_ms: 20,
            }],
        )
        .unwrap();

        let ranked = idx
            .evidence_frame_ids(&["u:alice".to_string()], AsOf::latest(), 100, 10, false)
            .unwrap();
        assert_eq!(ranked[0].0, FrameId(7));
        assert_eq!(ranked[1].0, FrameId(8));
    }

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let mut idx = LexIndex::open_empty().unwrap();
        entity_setup(&mut idx);
        idx.index_frame_text(FrameId(1), "hello world").unwrap();
        idx.assert_fact(
            "u:alice",
            "email",
            ObjectValue::Str("a@x.com".into()),
            0,
            None,
            0,
            &[],
        )
        .unwrap();

        let bytes = idx.serialize(false).unwrap();
        let mut restored = LexIndex::deserialize(&bytes).unwrap();
        assert_eq!(restored.query_fts("hello", 10).unwrap().len(), 1);
        let facts = restored.facts(Some("u:alice"), None, AsOf::latest(), 10).unwrap();
        assert_eq!(facts.facts.len(), 1);
    }
}
