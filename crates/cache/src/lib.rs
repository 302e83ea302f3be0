//! Durable segment cache on SQLite.
//!
//! Append-only per topic: every segment the engine observes is written here,
//! which is what makes `go_back`/replay able to reconstruct any prefix of a
//! topic. Cleared per topic on hand-off and wholesale on session end.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;

use lektra_segment::{Segment, SegmentKind, SegmentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

impl From<CacheError> for StoreError {
    fn from(err: CacheError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Cache read/write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub writes: u64,
    pub reads: u64,
}

/// SQLite-backed segment cache.
pub struct SqliteSegmentCache {
    conn: Mutex<Connection>,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl SqliteSegmentCache {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        let cache = Self {
            conn: Mutex::new(conn),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                topic_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                audio BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (topic_id, idx)
            );

            CREATE INDEX IF NOT EXISTS idx_segments_topic ON segments(topic_id, idx);
            "#,
        )?;
        Ok(())
    }

    /// Counters since this cache was opened.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }

    fn query_segments(&self, topic_id: &str, from: u32) -> Result<Vec<Segment>, CacheError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT idx, kind, text, audio FROM segments
             WHERE topic_id = ?1 AND idx >= ?2 ORDER BY idx ASC",
        )?;

        let rows = stmt.query_map((topic_id, from), |row| {
            let idx: u32 = row.get(0)?;
            let kind: String = row.get(1)?;
            let text: String = row.get(2)?;
            let audio: Vec<u8> = row.get(3)?;
            Ok((idx, kind, text, audio))
        })?;

        let mut segments = Vec::new();
        for row in rows {
            let (idx, kind, text, audio) = row?;
            let kind = match kind.as_str() {
                "question" => SegmentKind::Question,
                _ => SegmentKind::Narration,
            };
            segments.push(Segment::new(idx, kind, text, audio));
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(segments)
    }
}

impl SegmentStore for SqliteSegmentCache {
    fn cache_segment(&self, topic_id: &str, segment: &Segment) -> Result<(), StoreError> {
        let kind = match segment.kind {
            SegmentKind::Narration => "narration",
            SegmentKind::Question => "question",
        };
        let conn = self.conn.lock().expect("cache mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO segments (topic_id, idx, kind, text, audio, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                topic_id,
                segment.index,
                kind,
                &segment.text,
                segment.audio.as_ref(),
                Utc::now().timestamp(),
            ),
        )
        .map_err(CacheError::from)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn segments_from(&self, topic_id: &str, from: u32) -> Result<Vec<Segment>, StoreError> {
        Ok(self.query_segments(topic_id, from)?)
    }

    fn all_segments(&self, topic_id: &str) -> Result<Vec<Segment>, StoreError> {
        Ok(self.query_segments(topic_id, 0)?)
    }

    fn clear_topic(&self, topic_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let removed = conn
            .execute("DELETE FROM segments WHERE topic_id = ?1", [topic_id])
            .map_err(CacheError::from)?;
        tracing::debug!(topic_id, removed, "cleared topic cache");
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        conn.execute("DELETE FROM segments", [])
            .map_err(CacheError::from)?;
        Ok(())
    }
}
