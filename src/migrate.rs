use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Idempotent.
///
/// Every index table is keyed by `generation` so a new generation can be
/// staged next to the active one and swapped in by a single `meta` update.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            generation INTEGER NOT NULL,
            path TEXT NOT NULL,
            language TEXT,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            relevance TEXT NOT NULL,
            reason TEXT,
            PRIMARY KEY (generation, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            generation INTEGER NOT NULL,
            id TEXT NOT NULL,
            path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            PRIMARY KEY (generation, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            generation INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (generation, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS postings (
            generation INTEGER NOT NULL,
            term TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            tf INTEGER NOT NULL,
            PRIMARY KEY (generation, term, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            key TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(generation, path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_provider ON embedding_cache(provider)")
        .execute(pool)
        .await?;

    Ok(())
}
