//! Composition root: wires the per-project components together the way
//! the teacher's `main` wires storage, the embedding engine, and the
//! background worker into one `MemoryServer` before serving.
//!
//! Library callers needing less should use the modules directly; this is
//! the "just get me a working project" entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::adaptive_config::AdaptiveSearchConfig;
use crate::camera::MemoryDrilldown;
use crate::db;
use crate::dimension::DimensionService;
use crate::drilldown::DrilldownRegistry;
use crate::project::ProjectContext;
use crate::queue::EmbeddingQueue;
use crate::scorer::MiniCotScorer;

/// Every per-project singleton bundled together (spec §3 "Ownership and
/// lifecycle"). One instance per project path; never shared across paths.
pub struct SpecMemProject {
    pub pool: PgPool,
    pub context: ProjectContext,
    pub dimensions: DimensionService,
    pub adaptive_config: AdaptiveSearchConfig,
    pub queue: Arc<EmbeddingQueue>,
    pub drilldown: Arc<DrilldownRegistry>,
    pub memory_drilldown: MemoryDrilldown,
    pub scorer: MiniCotScorer,
}

impl SpecMemProject {
    /// Connects the pool, runs idempotent schema DDL, registers the project,
    /// and constructs every per-project component against the same pool.
    pub async fn bootstrap(database_url: &str, project_path: &str) -> Result<Self> {
        let pool = db::connect_pool(database_url, project_path)
            .await
            .context("connecting project pool")?;

        let context = ProjectContext::new(Some(pool.clone()));
        let project_id = context
            .register_project(project_path)
            .await
            .context("registering project")?;

        info!(project_path, %project_id, "project ready");

        let drilldown = Arc::new(DrilldownRegistry::new());

        Ok(Self {
            dimensions: DimensionService::new(pool.clone()),
            adaptive_config: AdaptiveSearchConfig::new(pool.clone()),
            queue: Arc::new(EmbeddingQueue::new(pool.clone(), project_id.to_string())),
            memory_drilldown: MemoryDrilldown::new(pool.clone(), drilldown.clone()),
            drilldown,
            scorer: MiniCotScorer::new(),
            context,
            pool,
        })
    }
}
