//! SQLite-backed [`SnapshotStore`].
//!
//! One database file per workspace root, `<store dir>/<store key>.sqlite`.
//! A generation is staged by writing all of its rows inside one
//! transaction and committed by flipping `meta.active_generation` (and
//! dropping older rows) inside another, so readers of the file never see a
//! half-written generation.
//!
//! Staging records a claim in `meta` (generation, file count, timestamp).
//! Commit refuses to activate a generation whose claim or rows are gone.
//! Rows of generations that are neither active nor claimed are reclaimed
//! by the next writer once the claim is older than [`STAGING_LEASE_SECS`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use codescope_core::embedding::{blob_to_vec, vec_to_blob};
use codescope_core::models::{Chunk, ChunkKind, FileRecord, Relevance};
use codescope_core::store::{Posting, Snapshot, SnapshotStore, StoreMeta};
use codescope_core::tokenize::tokenize;
use codescope_core::vector::VectorEntry;

use crate::db;
use crate::migrate;
use crate::workspace::WorkspaceRoot;

const META_ROOT: &str = "root";
const META_PROVIDER: &str = "provider";
const META_DIMS: &str = "dims";
const META_ACTIVE: &str = "active_generation";
const META_LAST: &str = "last_generation";
const META_VIOLATIONS: &str = "security_violations";
const META_STAGING: &str = "staging_generation";
const META_STAGING_FILES: &str = "staging_file_count";
const META_STAGING_AT: &str = "staging_claimed_at";

/// Age after which another writer's staging claim is considered abandoned.
pub const STAGING_LEASE_SECS: i64 = 15 * 60;

/// Bound parameters per `IN (...)` lookup.
const LOOKUP_BATCH: usize = 500;

const INDEX_TABLES: [&str; 4] = ["files", "chunks", "vectors", "postings"];

pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

/// Path of the store file for `root` under `store_dir`.
pub fn store_path(store_dir: &Path, root: &WorkspaceRoot) -> PathBuf {
    store_dir.join(format!("{}.sqlite", root.store_key()))
}

impl SqliteStore {
    /// Open or create the store for `root` and run migrations. Opening never
    /// touches index rows.
    pub async fn open(store_dir: &Path, root: &WorkspaceRoot) -> Result<Self> {
        let path = store_path(store_dir, root);
        let pool = db::connect(&path)
            .await
            .with_context(|| format!("Failed to open index store {}", path.display()))?;
        migrate::run_migrations(&pool).await?;

        let store = Self { pool, path };
        if store.get_meta(META_ROOT).await?.is_none() {
            store
                .set_meta(META_ROOT, &root.path().to_string_lossy())
                .await?;
        }
        Ok(store)
    }

    /// Whether a store file exists for `root` (without creating one).
    pub fn exists(store_dir: &Path, root: &WorkspaceRoot) -> bool {
        store_path(store_dir, root).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        upsert_meta(&self.pool, key, value).await
    }

    async fn active_generation(&self) -> Result<Option<u64>> {
        Ok(self
            .get_meta(META_ACTIVE)
            .await?
            .and_then(|v| v.parse::<u64>().ok()))
    }

    async fn load_generation(&self, generation: u64) -> Result<Snapshot> {
        let gen = generation as i64;

        let files = sqlx::query(
            "SELECT path, language, size, mtime, relevance, reason FROM files \
             WHERE generation = ? ORDER BY path",
        )
        .bind(gen)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<FileRecord> {
            let relevance: String = row.get("relevance");
            Ok(FileRecord {
                path: row.get("path"),
                language: row.get("language"),
                size: row.get::<i64, _>("size") as u64,
                mtime: row.get("mtime"),
                relevance: relevance.parse::<Relevance>().map_err(anyhow::Error::msg)?,
                reason: row.get("reason"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let chunks = sqlx::query(
            "SELECT id, path, start_line, end_line, start_byte, end_byte, kind, text, content_hash \
             FROM chunks WHERE generation = ? ORDER BY path, start_byte",
        )
        .bind(gen)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<Chunk> {
            let kind: String = row.get("kind");
            let text: String = row.get("text");
            Ok(Chunk {
                id: row.get("id"),
                path: row.get("path"),
                start_line: row.get::<i64, _>("start_line") as usize,
                end_line: row.get::<i64, _>("end_line") as usize,
                start_byte: row.get::<i64, _>("start_byte") as usize,
                end_byte: row.get::<i64, _>("end_byte") as usize,
                kind: kind.parse::<ChunkKind>().map_err(anyhow::Error::msg)?,
                tokens: tokenize(&text),
                text,
                content_hash: row.get("content_hash"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let vectors = sqlx::query(
            "SELECT chunk_id, provider, embedding FROM vectors \
             WHERE generation = ? ORDER BY chunk_id",
        )
        .bind(gen)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            VectorEntry {
                chunk_id: row.get("chunk_id"),
                provider: row.get("provider"),
                vector: blob_to_vec(&blob),
            }
        })
        .collect();

        let postings = sqlx::query(
            "SELECT term, chunk_id, tf FROM postings WHERE generation = ? ORDER BY term, chunk_id",
        )
        .bind(gen)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| Posting {
            term: row.get("term"),
            chunk_id: row.get("chunk_id"),
            tf: row.get::<i64, _>("tf") as u32,
        })
        .collect();

        let provider = self.get_meta(META_PROVIDER).await?.unwrap_or_default();
        let dims = self
            .get_meta(META_DIMS)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Snapshot {
            generation,
            provider,
            dims,
            files,
            chunks,
            vectors,
            postings,
        })
    }
}

async fn meta_in_tx<'e, E>(executor: E, key: &str) -> Result<Option<String>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(executor)
        .await?;
    Ok(value)
}

async fn delete_meta<'e, E>(executor: E, key: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM meta WHERE key = ?")
        .bind(key)
        .execute(executor)
        .await?;
    Ok(())
}

async fn upsert_meta<'e, E>(executor: E, key: &str, value: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn meta(&self) -> Result<StoreMeta> {
        Ok(StoreMeta {
            root: self.get_meta(META_ROOT).await?,
            provider: self.get_meta(META_PROVIDER).await?,
            dims: self
                .get_meta(META_DIMS)
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            active_generation: self.active_generation().await?,
            security_violations: self
                .get_meta(META_VIOLATIONS)
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn load_active(&self) -> Result<Option<Snapshot>> {
        match self.active_generation().await? {
            Some(generation) => Ok(Some(self.load_generation(generation).await?)),
            None => Ok(None),
        }
    }

    async fn next_generation(&self) -> Result<u64> {
        let value: String = sqlx::query_scalar(
            "INSERT INTO meta (key, value) VALUES (?, '1') \
             ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) \
             RETURNING value",
        )
        .bind(META_LAST)
        .fetch_one(&self.pool)
        .await?;
        value
            .parse::<u64>()
            .with_context(|| format!("corrupt {} value: {}", META_LAST, value))
    }

    async fn stage(&self, snapshot: &Snapshot) -> Result<()> {
        let gen = snapshot.generation as i64;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let claimed = meta_in_tx(&mut *tx, META_STAGING)
            .await?
            .and_then(|v| v.parse::<i64>().ok());
        let claimed_at = meta_in_tx(&mut *tx, META_STAGING_AT)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if let Some(other) = claimed.filter(|&g| g != gen) {
            if now - claimed_at < STAGING_LEASE_SECS {
                anyhow::bail!("generation {} is being staged by another writer", other);
            }
            tracing::warn!(generation = other, "reclaiming abandoned staged generation");
        }

        // Everything but the active generation is unclaimed once this
        // writer holds the claim.
        let active = meta_in_tx(&mut *tx, META_ACTIVE)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        for table in INDEX_TABLES {
            let sql = format!("DELETE FROM {} WHERE generation <> ?", table);
            sqlx::query(&sql).bind(active).execute(&mut *tx).await?;
        }
        upsert_meta(&mut *tx, META_STAGING, &gen.to_string()).await?;
        upsert_meta(&mut *tx, META_STAGING_FILES, &snapshot.files.len().to_string()).await?;
        upsert_meta(&mut *tx, META_STAGING_AT, &now.to_string()).await?;

        for f in &snapshot.files {
            sqlx::query(
                "INSERT INTO files (generation, path, language, size, mtime, relevance, reason) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(gen)
            .bind(&f.path)
            .bind(&f.language)
            .bind(f.size as i64)
            .bind(f.mtime)
            .bind(f.relevance.as_str())
            .bind(&f.reason)
            .execute(&mut *tx)
            .await?;
        }

        for c in &snapshot.chunks {
            sqlx::query(
                "INSERT INTO chunks (generation, id, path, start_line, end_line, start_byte, \
                 end_byte, kind, text, content_hash) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(gen)
            .bind(&c.id)
            .bind(&c.path)
            .bind(c.start_line as i64)
            .bind(c.end_line as i64)
            .bind(c.start_byte as i64)
            .bind(c.end_byte as i64)
            .bind(c.kind.as_str())
            .bind(&c.text)
            .bind(&c.content_hash)
            .execute(&mut *tx)
            .await?;
        }

        for v in &snapshot.vectors {
            sqlx::query(
                "INSERT INTO vectors (generation, chunk_id, provider, dims, embedding) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(gen)
            .bind(&v.chunk_id)
            .bind(&v.provider)
            .bind(v.vector.len() as i64)
            .bind(vec_to_blob(&v.vector))
            .execute(&mut *tx)
            .await?;
        }

        for p in &snapshot.postings {
            sqlx::query(
                "INSERT INTO postings (generation, term, chunk_id, tf) VALUES (?, ?, ?, ?)",
            )
            .bind(gen)
            .bind(&p.term)
            .bind(&p.chunk_id)
            .bind(p.tf as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit(&self, generation: u64, provider: &str, dims: usize) -> Result<()> {
        if let Some(active) = self.active_generation().await? {
            if generation <= active {
                anyhow::bail!(
                    "generation {} is not newer than the active generation {}",
                    generation,
                    active
                );
            }
        }

        let gen = generation as i64;
        let mut tx = self.pool.begin().await?;

        let claimed = meta_in_tx(&mut *tx, META_STAGING).await?;
        if claimed.as_deref() != Some(gen.to_string().as_str()) {
            anyhow::bail!(
                "generation {} is not staged by this writer (claim: {})",
                generation,
                claimed.as_deref().unwrap_or("none")
            );
        }
        let expected: i64 = meta_in_tx(&mut *tx, META_STAGING_FILES)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(-1);
        let staged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE generation = ?")
            .bind(gen)
            .fetch_one(&mut *tx)
            .await?;
        if staged != expected {
            anyhow::bail!(
                "staged generation {} is incomplete: {} of {} files present",
                generation,
                staged,
                expected
            );
        }

        upsert_meta(&mut *tx, META_ACTIVE, &generation.to_string()).await?;
        upsert_meta(&mut *tx, META_PROVIDER, provider).await?;
        upsert_meta(&mut *tx, META_DIMS, &dims.to_string()).await?;
        for key in [META_STAGING, META_STAGING_FILES, META_STAGING_AT] {
            delete_meta(&mut *tx, key).await?;
        }
        for table in INDEX_TABLES {
            let sql = format!("DELETE FROM {} WHERE generation <> ?", table);
            sqlx::query(&sql).bind(gen).execute(&mut *tx).await?;
        }
        // Vectors of another provider can never be served again.
        sqlx::query("DELETE FROM embedding_cache WHERE provider <> ?")
            .bind(provider)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn discard(&self, generation: u64) -> Result<()> {
        if self.active_generation().await? == Some(generation) {
            anyhow::bail!("refusing to discard the active generation {}", generation);
        }
        let mut tx = self.pool.begin().await?;
        for table in INDEX_TABLES {
            let sql = format!("DELETE FROM {} WHERE generation = ?", table);
            sqlx::query(&sql)
                .bind(generation as i64)
                .execute(&mut *tx)
                .await?;
        }
        if meta_in_tx(&mut *tx, META_STAGING).await?.as_deref()
            == Some(generation.to_string().as_str())
        {
            for key in [META_STAGING, META_STAGING_FILES, META_STAGING_AT] {
                delete_meta(&mut *tx, key).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn cached_embeddings(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        for batch in keys.chunks(LOOKUP_BATCH) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT key, embedding FROM embedding_cache WHERE key IN (");
            let mut separated = qb.separated(", ");
            for key in batch {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");

            for row in qb.build().fetch_all(&self.pool).await? {
                let blob: Vec<u8> = row.get("embedding");
                found.insert(row.get::<String, _>("key"), blob_to_vec(&blob));
            }
        }
        Ok(found)
    }

    async fn cache_embeddings(&self, provider: &str, entries: &[(String, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (key, vector) in entries {
            sqlx::query(
                "INSERT INTO embedding_cache (key, provider, dims, embedding, created_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET embedding = excluded.embedding, \
                 dims = excluded.dims, created_at = excluded.created_at",
            )
            .bind(key)
            .bind(provider)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn retain_embeddings(&self, keep: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("CREATE TEMP TABLE IF NOT EXISTS keep_keys (key TEXT PRIMARY KEY)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM keep_keys").execute(&mut *tx).await?;
        for batch in keep.chunks(LOOKUP_BATCH) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO keep_keys (key) ");
            qb.push_values(batch, |mut row, key| {
                row.push_bind(key);
            });
            qb.build().execute(&mut *tx).await?;
        }
        let removed = sqlx::query(
            "DELETE FROM embedding_cache WHERE key NOT IN (SELECT key FROM keep_keys)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query("DROP TABLE keep_keys").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn add_security_violations(&self, n: u64) -> Result<u64> {
        let value: String = sqlx::query_scalar(
            "INSERT INTO meta (key, value) VALUES (?, CAST(? AS TEXT)) \
             ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + ? AS TEXT) \
             RETURNING value",
        )
        .bind(META_VIOLATIONS)
        .bind(n as i64)
        .bind(n as i64)
        .fetch_one(&self.pool)
        .await?;
        value
            .parse::<u64>()
            .with_context(|| format!("corrupt {} value: {}", META_VIOLATIONS, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_core::chunk::line_windows;
    use codescope_core::chunk::WindowConfig;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let root = WorkspaceRoot::new(&ws).unwrap();
        let store = SqliteStore::open(&dir.path().join("store"), &root).await.unwrap();
        (dir, store)
    }

    fn snapshot(generation: u64) -> Snapshot {
        let chunks = line_windows("notes.txt", "alpha beta\ngamma\n", &WindowConfig::default());
        Snapshot {
            generation,
            provider: "hash/2".into(),
            dims: 2,
            files: vec![FileRecord {
                path: "notes.txt".into(),
                language: Some("text".into()),
                size: 17,
                mtime: 42,
                relevance: Relevance::Medium,
                reason: None,
            }],
            vectors: vec![VectorEntry {
                chunk_id: chunks[0].id.clone(),
                vector: vec![0.6, 0.8],
                provider: "hash/2".into(),
            }],
            postings: vec![Posting {
                term: "alpha".into(),
                chunk_id: chunks[0].id.clone(),
                tf: 1,
            }],
            chunks,
        }
    }

    #[tokio::test]
    async fn stage_commit_load_roundtrip() {
        let (_dir, store) = open_store().await;
        assert!(store.load_active().await.unwrap().is_none());

        let generation = store.next_generation().await.unwrap();
        let snap = snapshot(generation);
        store.stage(&snap).await.unwrap();
        assert!(store.load_active().await.unwrap().is_none());

        store.commit(generation, "hash/2", 2).await.unwrap();
        let loaded = store.load_active().await.unwrap().unwrap();
        assert_eq!(loaded, snap);
        let meta = store.meta().await.unwrap();
        assert_eq!(meta.provider.as_deref(), Some("hash/2"));
        assert_eq!(meta.dims, 2);
        assert!(meta.root.is_some());
    }

    #[tokio::test]
    async fn commit_drops_older_generation_and_discard_keeps_active() {
        let (_dir, store) = open_store().await;
        let first = store.next_generation().await.unwrap();
        store.stage(&snapshot(first)).await.unwrap();
        store.commit(first, "hash/2", 2).await.unwrap();

        let second = store.next_generation().await.unwrap();
        assert_eq!(second, first + 1);
        store.stage(&snapshot(second)).await.unwrap();
        store.discard(second).await.unwrap();
        assert_eq!(
            store.load_active().await.unwrap().unwrap().generation,
            first
        );
        assert!(store.discard(first).await.is_err());

        let third = store.next_generation().await.unwrap();
        store.stage(&snapshot(third)).await.unwrap();
        store.commit(third, "hash/2", 2).await.unwrap();
        let left: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT generation) FROM chunks")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(left, 1);
    }

    #[tokio::test]
    async fn cache_and_violation_counter_persist() {
        let (_dir, store) = open_store().await;
        store
            .cache_embeddings("hash/2", &[("k".into(), vec![1.0, 0.0])])
            .await
            .unwrap();
        let hit = store
            .cached_embeddings(&["k".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);

        assert_eq!(store.add_security_violations(3).await.unwrap(), 3);
        assert_eq!(store.add_security_violations(2).await.unwrap(), 5);
        assert_eq!(store.meta().await.unwrap().security_violations, 5);
    }

    async fn committed_store() -> (tempfile::TempDir, WorkspaceRoot, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let root = WorkspaceRoot::new(&ws).unwrap();
        let store = SqliteStore::open(&dir.path().join("store"), &root).await.unwrap();
        let first = store.next_generation().await.unwrap();
        store.stage(&snapshot(first)).await.unwrap();
        store.commit(first, "hash/2", 2).await.unwrap();
        (dir, root, store)
    }

    #[tokio::test]
    async fn opening_between_stage_and_commit_keeps_staged_rows() {
        let (dir, root, writer) = committed_store().await;
        let second = writer.next_generation().await.unwrap();
        writer.stage(&snapshot(second)).await.unwrap();

        let reader = SqliteStore::open(&dir.path().join("store"), &root).await.unwrap();
        assert_eq!(reader.load_active().await.unwrap().unwrap().generation, second - 1);

        writer.commit(second, "hash/2", 2).await.unwrap();
        let active = reader.load_active().await.unwrap().unwrap();
        assert_eq!(active.generation, second);
        assert_eq!(active.files.len(), 1);
        assert_eq!(active.chunks.len(), 1);
    }

    #[tokio::test]
    async fn second_writer_cannot_stage_over_a_live_claim() {
        let (dir, root, writer) = committed_store().await;
        let other = SqliteStore::open(&dir.path().join("store"), &root).await.unwrap();

        let mine = writer.next_generation().await.unwrap();
        writer.stage(&snapshot(mine)).await.unwrap();
        let theirs = other.next_generation().await.unwrap();
        assert!(other.stage(&snapshot(theirs)).await.is_err());
        assert!(other.commit(theirs, "hash/2", 2).await.is_err());

        writer.commit(mine, "hash/2", 2).await.unwrap();
        assert_eq!(other.load_active().await.unwrap().unwrap().generation, mine);
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed_by_next_writer() {
        let (dir, root, crashed) = committed_store().await;
        let orphan = crashed.next_generation().await.unwrap();
        crashed.stage(&snapshot(orphan)).await.unwrap();
        let stale = chrono::Utc::now().timestamp() - STAGING_LEASE_SECS - 1;
        upsert_meta(&crashed.pool, META_STAGING_AT, &stale.to_string())
            .await
            .unwrap();

        let writer = SqliteStore::open(&dir.path().join("store"), &root).await.unwrap();
        let next = writer.next_generation().await.unwrap();
        writer.stage(&snapshot(next)).await.unwrap();
        let orphan_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE generation = ?")
            .bind(orphan as i64)
            .fetch_one(&writer.pool)
            .await
            .unwrap();
        assert_eq!(orphan_rows, 0);

        writer.commit(next, "hash/2", 2).await.unwrap();
        assert!(crashed.commit(orphan, "hash/2", 2).await.is_err());
        assert_eq!(writer.load_active().await.unwrap().unwrap().generation, next);
    }

    #[tokio::test]
    async fn commit_refuses_generation_whose_rows_vanished() {
        let (_dir, _root, store) = committed_store().await;
        let second = store.next_generation().await.unwrap();
        store.stage(&snapshot(second)).await.unwrap();
        sqlx::query("DELETE FROM files WHERE generation = ?")
            .bind(second as i64)
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(store.commit(second, "hash/2", 2).await.is_err());
        let active = store.load_active().await.unwrap().unwrap();
        assert_eq!(active.generation, second - 1);
        assert_eq!(active.files.len(), 1);
    }

    #[tokio::test]
    async fn cache_is_pruned_by_provider_and_by_use() {
        let (_dir, _root, store) = committed_store().await;
        store
            .cache_embeddings(
                "hash/2",
                &[("a".into(), vec![1.0, 0.0]), ("b".into(), vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        store
            .cache_embeddings("old/2", &[("c".into(), vec![1.0, 1.0])])
            .await
            .unwrap();

        let next = store.next_generation().await.unwrap();
        store.stage(&snapshot(next)).await.unwrap();
        store.commit(next, "hash/2", 2).await.unwrap();
        let keys: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(store.cached_embeddings(&keys).await.unwrap().len(), 2);

        assert_eq!(store.retain_embeddings(&["a".into()]).await.unwrap(), 1);
        let left = store.cached_embeddings(&keys).await.unwrap();
        assert_eq!(left.keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
