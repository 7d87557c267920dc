//! Per-project connection pooling and idempotent schema DDL (spec §3, §5).
//!
//! Every new physical connection gets `search_path` set to the project's
//! schema before it is handed back to the pool, so a single process can
//! hold pools for many projects without ever leaking a query across
//! schemas.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

use crate::error::Result;
use crate::project::schema_name;

/// Builds a pool for `project_path`'s schema. Every connection runs `SET
/// search_path` on acquire (spec §5 "a connection hook sets `search_path`
/// before first use").
pub async fn connect_pool(database_url: &str, project_path: &str) -> Result<PgPool> {
    let schema = schema_name(project_path);
    let options: PgConnectOptions = database_url.parse().map_err(|e| {
        crate::error::SpecMemError::Fatal(format!("invalid database url: {e}"))
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(move |conn, _meta| {
            let schema = schema.clone();
            Box::pin(async move {
                conn.execute(format!(r#"SET search_path TO "{schema}", public"#).as_str())
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    ensure_schema(&pool, project_path).await?;
    Ok(pool)
}

/// Creates the project's schema and every table/extension it needs, if
/// absent. Idempotent: safe to call on every process start.
pub async fn ensure_schema(pool: &PgPool, project_path: &str) -> Result<()> {
    let schema = schema_name(project_path);

    pool.execute("CREATE EXTENSION IF NOT EXISTS vector").await?;
    pool.execute(format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}""#).as_str())
        .await?;
    pool.execute(format!(r#"SET search_path TO "{schema}", public"#).as_str())
        .await?;

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id UUID PRIMARY KEY,
            path TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .await?;

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id UUID PRIMARY KEY,
            content TEXT NOT NULL,
            tags TEXT[] NOT NULL DEFAULT '{}',
            metadata JSONB NOT NULL DEFAULT '{}',
            embedding VECTOR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .await?;

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS code_definitions (
            file_path TEXT NOT NULL,
            name TEXT NOT NULL,
            definition_type TEXT NOT NULL,
            language TEXT NOT NULL,
            start_line INT NOT NULL,
            end_line INT NOT NULL,
            content TEXT NOT NULL,
            signature TEXT,
            docstring TEXT,
            is_exported BOOLEAN NOT NULL DEFAULT false,
            PRIMARY KEY (file_path, name)
        )
        "#,
    )
    .await?;

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS codebase_files (
            file_path TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            language_id TEXT NOT NULL,
            content TEXT NOT NULL,
            line_count INT NOT NULL
        )
        "#,
    )
    .await?;

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS codebase_pointers (
            memory_id UUID NOT NULL,
            file_path TEXT NOT NULL,
            line_start INT NOT NULL,
            line_end INT NOT NULL,
            function_name TEXT
        )
        "#,
    )
    .await?;

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_queue (
            id BIGSERIAL PRIMARY KEY,
            project_id TEXT NOT NULL,
            text TEXT NOT NULL,
            priority INT NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            embedding VECTOR,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            processed_at TIMESTAMPTZ
        )
        "#,
    )
    .await?;

    pool.execute(
        "CREATE INDEX IF NOT EXISTS embedding_queue_drain_idx ON embedding_queue (status, priority DESC, created_at ASC)",
    )
    .await?;

    Ok(())
}
