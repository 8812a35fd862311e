//! SQLite database management with migrations
//!
//! Stores passages with their metadata, persisted embeddings (so the vector
//! index can be rebuilt without re-embedding) and query history.

use crate::error::{LecternError, Result};
use crate::retrieval::{OracleError, Passage, PassageId, PassageMetadata, PassageStore};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

/// Outcome of an upsert batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertStats {
    /// Passages whose text or metadata changed and need (re)indexing
    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }
}

impl Database {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LecternError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        Self::with_manager(SqliteConnectionManager::file(db_path), 16)
    }

    /// Private in-memory database, for tests and throwaway sessions
    pub fn in_memory() -> Result<Self> {
        // A single connection keeps every caller on the same in-memory database
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let manager = manager.with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| LecternError::Config(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert or replace passages by id
    ///
    /// A passage whose content hash is unchanged is left alone. Changed passages
    /// lose their stored embedding.
    pub fn upsert_passages(&self, passages: &[Passage]) -> Result<UpsertStats> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut stats = UpsertStats::default();

        for passage in passages {
            let metadata = serde_json::to_string(&passage.metadata).map_err(|e| LecternError::Json {
                source: e,
                context: format!("Failed to encode metadata of passage {}", passage.id),
            })?;
            let hash = content_hash(passage, &metadata);

            let existing: Option<String> = tx
                .query_row(
                    "SELECT content_hash FROM passages WHERE id = ?1",
                    params![passage.id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(existing) if existing == hash => {
                    stats.unchanged += 1;
                    continue;
                }
                Some(_) => {
                    tx.execute(
                        "DELETE FROM embeddings WHERE passage_id = ?1",
                        params![passage.id],
                    )?;
                    stats.updated += 1;
                }
                None => stats.inserted += 1,
            }

            tx.execute(
                "INSERT INTO passages (id, source_id, position, text, metadata, content_hash, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
                 ON CONFLICT(id) DO UPDATE SET
                    source_id = excluded.source_id,
                    position = excluded.position,
                    text = excluded.text,
                    metadata = excluded.metadata,
                    content_hash = excluded.content_hash,
                    indexed_at = excluded.indexed_at",
                params![
                    passage.id,
                    passage.source_id,
                    passage.position,
                    passage.text,
                    metadata,
                    hash
                ],
            )?;
        }

        tx.commit()?;
        Ok(stats)
    }

    pub fn get_passage(&self, id: PassageId) -> Result<Option<Passage>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, source_id, position, text, metadata FROM passages WHERE id = ?1",
                params![id],
                PassageRow::from_row,
            )
            .optional()?;

        row.map(PassageRow::into_passage).transpose()
    }

    /// Lookup several ids; the result is parallel to `ids`
    pub fn get_passages(&self, ids: &[PassageId]) -> Result<Vec<Option<Passage>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, source_id, position, text, metadata FROM passages WHERE id = ?1",
        )?;

        let mut passages = Vec::with_capacity(ids.len());
        for id in ids {
            let row = stmt
                .query_row(params![id], PassageRow::from_row)
                .optional()?;
            passages.push(row.map(PassageRow::into_passage).transpose()?);
        }
        Ok(passages)
    }

    /// Delete every passage of a source, returning the removed ids
    pub fn remove_source(&self, source_id: &str) -> Result<Vec<PassageId>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let ids: Vec<PassageId> = {
            let mut stmt = tx.prepare("SELECT id FROM passages WHERE source_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![source_id], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        tx.execute("DELETE FROM passages WHERE source_id = ?1", params![source_id])?;
        tx.commit()?;

        tracing::info!("Removed {} passages of source {}", ids.len(), source_id);
        Ok(ids)
    }

    /// Distinct source ids with their passage counts
    pub fn sources(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, COUNT(*) FROM passages GROUP BY source_id ORDER BY source_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Store embeddings produced by `model`
    pub fn put_embeddings(&self, model: &str, embeddings: &[(PassageId, Vec<f32>)]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for (id, vector) in embeddings {
            tx.execute(
                "INSERT INTO embeddings (passage_id, model, dimension, vector)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(passage_id) DO UPDATE SET
                    model = excluded.model,
                    dimension = excluded.dimension,
                    vector = excluded.vector",
                params![id, model, vector.len() as i64, encode_vector(vector)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// All embeddings produced by `model`, ordered by passage id
    pub fn load_embeddings(&self, model: &str) -> Result<Vec<(PassageId, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT passage_id, vector FROM embeddings WHERE model = ?1 ORDER BY passage_id",
        )?;
        let rows = stmt.query_map(params![model], |row| {
            Ok((row.get::<_, PassageId>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            embeddings.push((id, decode_vector(&blob)));
        }
        Ok(embeddings)
    }

    /// Ids among `ids` that have no embedding from `model`
    pub fn missing_embeddings(&self, model: &str, ids: &[PassageId]) -> Result<Vec<PassageId>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM embeddings WHERE passage_id = ?1 AND model = ?2)",
        )?;

        let mut missing = Vec::new();
        for id in ids {
            let present: bool = stmt.query_row(params![id, model], |row| row.get(0))?;
            if !present {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    /// Count one use of a query string
    pub fn record_query(&self, query: &str) -> Result<()> {
        let query = crate::retrieval::text::normalize(query);
        if query.is_empty() {
            return Ok(());
        }

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO query_history (query, count, last_used_at)
             VALUES (?1, 1, datetime('now'))
             ON CONFLICT(query) DO UPDATE SET
                count = count + 1,
                last_used_at = excluded.last_used_at",
            params![query],
        )?;
        Ok(())
    }

    /// Most used queries first
    pub fn query_history(&self, limit: usize) -> Result<Vec<(String, u64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT query, count FROM query_history ORDER BY count DESC, query ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            passage_count: count("SELECT COUNT(*) FROM passages")?,
            source_count: count("SELECT COUNT(DISTINCT source_id) FROM passages")?,
            embedding_count: count("SELECT COUNT(*) FROM embeddings")?,
            distinct_queries: count("SELECT COUNT(*) FROM query_history")?,
        })
    }
}

#[async_trait]
impl PassageStore for Database {
    async fn get(&self, id: PassageId) -> std::result::Result<Option<Passage>, OracleError> {
        self.get_passage(id)
            .map_err(|e| OracleError::Backend(e.to_string()))
    }

    async fn get_many(
        &self,
        ids: &[PassageId],
    ) -> std::result::Result<Vec<Option<Passage>>, OracleError> {
        self.get_passages(ids)
            .map_err(|e| OracleError::Backend(e.to_string()))
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    pub passage_count: usize,
    pub source_count: usize,
    pub embedding_count: usize,
    pub distinct_queries: usize,
}

struct PassageRow {
    id: PassageId,
    source_id: String,
    position: u32,
    text: String,
    metadata: String,
}

impl PassageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_id: row.get(1)?,
            position: row.get(2)?,
            text: row.get(3)?,
            metadata: row.get(4)?,
        })
    }

    fn into_passage(self) -> Result<Passage> {
        let metadata: PassageMetadata =
            serde_json::from_str(&self.metadata).map_err(|e| LecternError::Json {
                source: e,
                context: format!("Failed to decode metadata of passage {}", self.id),
            })?;

        Ok(Passage {
            id: self.id,
            source_id: self.source_id,
            text: self.text,
            position: self.position,
            metadata,
        })
    }
}

fn content_hash(passage: &Passage, metadata_json: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(passage.source_id.as_bytes());
    hasher.update(&passage.position.to_le_bytes());
    hasher.update(passage.text.as_bytes());
    hasher.update(metadata_json.as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE passages (
        id INTEGER PRIMARY KEY,
        source_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        content_hash TEXT NOT NULL,
        indexed_at TEXT NOT NULL
    );

    CREATE INDEX idx_passages_source ON passages(source_id, position);

    CREATE TABLE embeddings (
        passage_id INTEGER PRIMARY KEY,
        model TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        vector BLOB NOT NULL,
        FOREIGN KEY (passage_id) REFERENCES passages(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model);

    CREATE TABLE query_history (
        query TEXT PRIMARY KEY,
        count INTEGER NOT NULL DEFAULT 1,
        last_used_at TEXT NOT NULL
    );

    CREATE INDEX idx_query_history_count ON query_history(count DESC);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn passage(id: PassageId, source: &str, text: &str) -> Passage {
        Passage::new(id, source, id as u32, text)
    }

    #[test]
    fn test_database_creation() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("store").join("passages.sqlite");

        let db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(db.stats().unwrap(), DbStats::default());
    }

    #[test]
    fn test_migrations_idempotent() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("passages.sqlite");

        drop(Database::new(&db_path).unwrap());
        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_upsert_tracks_changes() {
        let db = Database::in_memory().unwrap();

        let stats = db
            .upsert_passages(&[passage(1, "bio.pdf", "Cells"), passage(2, "bio.pdf", "Tissues")])
            .unwrap();
        assert_eq!(stats.inserted, 2);

        db.put_embeddings("m", &[(1, vec![0.5, 0.25]), (2, vec![1.0, 0.0])])
            .unwrap();

        let stats = db
            .upsert_passages(&[passage(1, "bio.pdf", "Cells"), passage(2, "bio.pdf", "Organs")])
            .unwrap();
        assert_eq!(
            stats,
            UpsertStats {
                inserted: 0,
                updated: 1,
                unchanged: 1
            }
        );
        assert_eq!(stats.changed(), 1);

        // The edited passage lost its stale embedding
        let embeddings = db.load_embeddings("m").unwrap();
        assert_eq!(embeddings, vec![(1, vec![0.5, 0.25])]);
        assert_eq!(db.missing_embeddings("m", &[1, 2]).unwrap(), vec![2]);
        assert_eq!(db.missing_embeddings("other", &[1]).unwrap(), vec![1]);
        assert_eq!(db.get_passage(2).unwrap().unwrap().text, "Organs");
    }

    #[test]
    fn test_metadata_persisted() {
        let db = Database::in_memory().unwrap();
        let mut p = passage(5, "chem.pdf", "Acids donate protons");
        p.metadata.section_title = Some("Acids and Bases".to_string());
        p.metadata.page_number = Some(42);
        db.upsert_passages(&[p.clone()]).unwrap();

        assert_eq!(db.get_passage(5).unwrap(), Some(p));
        assert_eq!(db.get_passage(6).unwrap(), None);

        let many = db.get_passages(&[6, 5]).unwrap();
        assert!(many[0].is_none());
        assert_eq!(many[1].as_ref().unwrap().metadata.page_number, Some(42));
    }

    #[test]
    fn test_remove_source_cascades() {
        let db = Database::in_memory().unwrap();
        db.upsert_passages(&[
            passage(1, "bio.pdf", "a"),
            passage(2, "chem.pdf", "b"),
            passage(3, "bio.pdf", "c"),
        ])
        .unwrap();
        db.put_embeddings("m", &[(1, vec![1.0]), (2, vec![1.0]), (3, vec![1.0])])
            .unwrap();

        assert_eq!(db.remove_source("bio.pdf").unwrap(), vec![1, 3]);

        let stats = db.stats().unwrap();
        assert_eq!(stats.passage_count, 1);
        assert_eq!(stats.embedding_count, 1);
        assert_eq!(db.sources().unwrap(), vec![("chem.pdf".to_string(), 1)]);
    }

    #[test]
    fn test_query_history() {
        let db = Database::in_memory().unwrap();
        db.record_query("Krebs cycle").unwrap();
        db.record_query("krebs   CYCLE").unwrap();
        db.record_query("osmosis").unwrap();
        db.record_query("   ").unwrap();

        assert_eq!(
            db.query_history(10).unwrap(),
            vec![("krebs cycle".to_string(), 2), ("osmosis".to_string(), 1)]
        );
        assert_eq!(db.query_history(1).unwrap().len(), 1);
    }

    #[test]
    fn test_vector_encoding() {
        let vector = vec![0.1, -2.5, 3.75, f32::MIN_POSITIVE];
        assert_eq!(decode_vector(&encode_vector(&vector)), vector);
    }

    #[tokio::test]
    async fn test_passage_store_impl() {
        let db = Database::in_memory().unwrap();
        db.upsert_passages(&[passage(9, "notes", "Osmosis")]).unwrap();

        let store: &dyn PassageStore = &db;
        assert_eq!(store.get(9).await.unwrap().unwrap().text, "Osmosis");
        assert!(store.get(10).await.unwrap().is_none());
    }
}
