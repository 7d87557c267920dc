//! ProjectContext (spec §4.1, component C3): project resolution, schema
//! derivation, registration, and dynamic project-column detection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::config;
use crate::error::Result;
use crate::models::ProjectRecord;

/// Derives the schema name for a project path (spec §3):
/// `specmem_default` for the root/empty path, else
/// `specmem_<12-hex-char sha256 of the lowercased, trailing-slash-stripped path>`.
///
/// Pure, total, deterministic across processes.
pub fn schema_name(path: &str) -> String {
    let normalized = path.trim_end_matches('/').to_lowercase();
    if normalized.is_empty() || normalized == "/" {
        return "specmem_default".to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{:x}", digest);
    format!("specmem_{}", &hex[..12])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectColumn {
    ProjectPath,
    ProjectId,
}

/// A WHERE-clause fragment ready to append to an existing query, plus the
/// parameter it binds and the next positional parameter index (spec §4.1
/// `buildDynamicProjectFilter`).
#[derive(Debug, Clone)]
pub struct ProjectFilter {
    pub sql: String,
    pub param: String,
    pub next_index: usize,
}

impl ProjectFilter {
    fn empty(next_index: usize) -> Self {
        Self {
            sql: String::new(),
            param: String::new(),
            next_index,
        }
    }
}

/// Resolves the active project, derives its schema, registers it, and
/// supplies project-scoped WHERE fragments. One instance per project path
/// (spec §3 ownership) — database-touching methods fail if no pool has been
/// attached, but construction without one is permitted.
pub struct ProjectContext {
    pool: Option<PgPool>,
    /// Stack of `withProject` overrides, innermost last. Empty means "use
    /// the process-resolved path" (env var, then cwd, then `/`).
    override_stack: Mutex<Vec<String>>,
    /// Per-project `(project_path, table) -> detected column` cache.
    /// Column-detection errors are never cached (spec §4.1).
    column_cache: RwLock<HashMap<(String, String), ProjectColumn>>,
}

impl ProjectContext {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self {
            pool,
            override_stack: Mutex::new(Vec::new()),
            column_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn attach_pool(&mut self, pool: PgPool) {
        self.pool = Some(pool);
    }

    /// The active project path, resolved per call (spec §4.1): the
    /// innermost `withProject` override if any, else env/cwd/root.
    pub async fn active_path(&self) -> String {
        let stack = self.override_stack.lock().await;
        stack
            .last()
            .cloned()
            .unwrap_or_else(config::resolve_active_project_path)
    }

    pub fn get_schema_name(path: &str) -> String {
        schema_name(path)
    }

    /// Idempotent UPSERT on `path`. Concurrent registrants of the same path
    /// converge to the same UUID via `ON CONFLICT ... DO UPDATE RETURNING`.
    pub async fn register_project(&self, path: &str) -> Result<Uuid> {
        let pool = self.require_pool()?;
        let name = derive_project_name(path);
        let now = Utc::now();

        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO projects (id, path, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (path) DO UPDATE
            SET updated_at = $4
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(path)
        .bind(&name)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }

    pub async fn get_project(&self, path: &str) -> Result<Option<ProjectRecord>> {
        let pool = self.require_pool()?;
        let row = sqlx::query_as::<_, (Uuid, String, String, chrono::DateTime<Utc>, chrono::DateTime<Utc>)>(
            "SELECT id, path, name, created_at, updated_at FROM projects WHERE path = $1",
        )
        .bind(path)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|(id, path, name, created_at, updated_at)| ProjectRecord {
            id,
            path,
            name,
            created_at,
            updated_at,
        }))
    }

    /// Detects whether `table` is gated by `project_path` or `project_id`,
    /// preferring `project_path`. Cached per `(project, table)`; detection
    /// errors are not cached and propagate.
    pub async fn detect_project_column(
        &self,
        project_path: &str,
        table: &str,
    ) -> Result<Option<ProjectColumn>> {
        let cache_key = (project_path.to_string(), table.to_string());
        if let Some(col) = self.column_cache.read().await.get(&cache_key) {
            return Ok(Some(*col));
        }

        let pool = self.require_pool()?;
        let columns: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT column_name FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
              AND column_name IN ('project_path', 'project_id')
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await?;

        let names: Vec<&str> = columns.iter().map(|(c,)| c.as_str()).collect();
        let detected = if names.contains(&"project_path") {
            Some(ProjectColumn::ProjectPath)
        } else if names.contains(&"project_id") {
            Some(ProjectColumn::ProjectId)
        } else {
            None
        };

        if let Some(col) = detected {
            self.column_cache.write().await.insert(cache_key, col);
        }
        Ok(detected)
    }

    /// Builds a WHERE fragment suitable to append to an existing query.
    /// On a column-detection error the fragment is empty (never
    /// over-restricted, never silently global) and the error is logged.
    pub async fn build_dynamic_project_filter(
        &self,
        project_path: &str,
        table: &str,
        param_index: usize,
    ) -> ProjectFilter {
        match self.detect_project_column(project_path, table).await {
            Ok(Some(ProjectColumn::ProjectPath)) => ProjectFilter {
                sql: format!(" AND project_path = ${}", param_index),
                param: project_path.to_string(),
                next_index: param_index + 1,
            },
            Ok(Some(ProjectColumn::ProjectId)) => match self.register_project(project_path).await {
                Ok(id) => ProjectFilter {
                    sql: format!(" AND project_id = ${}", param_index),
                    param: id.to_string(),
                    next_index: param_index + 1,
                },
                Err(e) => {
                    warn!("failed to resolve project_id for filter: {e}");
                    ProjectFilter::empty(param_index)
                }
            },
            Ok(None) => ProjectFilter::empty(param_index),
            Err(e) => {
                warn!(table, "project column detection failed: {e}");
                ProjectFilter::empty(param_index)
            }
        }
    }

    /// Runs `fn` with `path` pushed as the active override, restoring the
    /// prior state on both normal return and an `Err` returned by `fn`. A
    /// panic unwinding through the awaited future skips the pop.
    pub async fn with_project<F, Fut, T>(&self, path: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.override_stack.lock().await.push(path.to_string());
        let result = f().await;
        self.override_stack.lock().await.pop();
        result
    }

    fn require_pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            crate::error::SpecMemError::Fatal(
                "ProjectContext has no database handle attached".into(),
            )
        })
    }
}

fn derive_project_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

/// Process-local per-project singleton registry, keyed by project path
/// (spec §4.1 design note: "keep a process-local registry keyed by project
/// path"). Each entry owns its own pool and never shares one across
/// projects.
#[derive(Default)]
pub struct ProjectRegistry {
    contexts: Mutex<HashMap<String, Arc<ProjectContext>>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing singleton for `path`, or lazily creates one by
    /// awaiting `make_pool` (invoked at most once per path — connecting and
    /// running schema DDL is inherently async, e.g. [`crate::db::connect_pool`]).
    pub async fn get_or_create<F, Fut>(&self, path: &str, make_pool: F) -> Arc<ProjectContext>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = PgPool>,
    {
        let mut contexts = self.contexts.lock().await;
        if let Some(ctx) = contexts.get(path) {
            return ctx.clone();
        }
        let ctx = Arc::new(ProjectContext::new(Some(make_pool().await)));
        contexts.insert(path.to_string(), ctx.clone());
        ctx
    }

    /// Destroys a project's singleton (reset or process exit cleanup path).
    /// Never affects any other project's instance.
    pub async fn remove(&self, path: &str) {
        self.contexts.lock().await.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_empty_path_map_to_default_schema() {
        assert_eq!(schema_name(""), "specmem_default");
        assert_eq!(schema_name("/"), "specmem_default");
    }

    #[test]
    fn schema_name_is_deterministic_and_shaped() {
        let a = schema_name("/home/user/project");
        let b = schema_name("/home/user/project");
        assert_eq!(a, b);
        assert!(a.starts_with("specmem_"));
        assert_eq!(a.len(), "specmem_".len() + 12);
    }

    #[test]
    fn schema_name_ignores_trailing_slash_and_case() {
        let a = schema_name("/Home/User/Project/");
        let b = schema_name("/home/user/project");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_paths_hash_differently() {
        assert_ne!(schema_name("/a"), schema_name("/b"));
    }

    #[tokio::test]
    async fn with_project_restores_prior_state_on_success() {
        let ctx = ProjectContext::new(None);
        ctx.override_stack.lock().await.push("/outer".to_string());

        ctx.with_project("/inner", || async { () }).await;

        let stack = ctx.override_stack.lock().await;
        assert_eq!(stack.as_slice(), ["/outer".to_string()]);
    }

    #[tokio::test]
    async fn with_project_restores_prior_state_even_if_fn_errors() {
        let ctx = ProjectContext::new(None);
        let _: Result<()> = ctx
            .with_project("/inner", || async {
                Err(crate::error::SpecMemError::validation("boom"))
            })
            .await;

        assert!(ctx.override_stack.lock().await.is_empty());
    }
}
