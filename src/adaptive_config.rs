//! AdaptiveSearchConfig (spec §4.3, component C4): corpus-density-driven
//! `(threshold, limit, quality)` tuning.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::Result;

pub const MIN_VECTORS_FOR_SEMANTIC: i64 = 100;
const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchTuning {
    pub threshold: f64,
    pub limit: usize,
    pub quality_score: f64,
    pub has_enough_data: bool,
}

/// Piecewise-constant bracket selection (spec §4.3 table). Pure function —
/// the density-to-tuning mapping has no I/O of its own.
pub fn tuning_for_count(n: i64) -> SearchTuning {
    if n <= 0 {
        SearchTuning {
            threshold: 0.0,
            limit: 0,
            quality_score: 0.0,
            has_enough_data: false,
        }
    } else if n < 100 {
        SearchTuning {
            threshold: 0.05,
            limit: n.min(10) as usize,
            quality_score: n as f64 / 100.0,
            has_enough_data: false,
        }
    } else if n < 1_000 {
        SearchTuning {
            threshold: 0.10,
            limit: n.min(25) as usize,
            quality_score: 0.5 + n as f64 / 2000.0,
            has_enough_data: true,
        }
    } else if n < 10_000 {
        SearchTuning {
            threshold: 0.15,
            limit: 50,
            quality_score: 0.8,
            has_enough_data: true,
        }
    } else if n < 50_000 {
        SearchTuning {
            threshold: 0.20,
            limit: 100,
            quality_score: 0.9,
            has_enough_data: true,
        }
    } else {
        SearchTuning {
            threshold: 0.25,
            limit: 200,
            quality_score: 1.0,
            has_enough_data: true,
        }
    }
}

/// Caches tuning per `(project, database)` for 5 minutes; `refresh` forces
/// a rescan (spec §4.3).
pub struct AdaptiveSearchConfig {
    pool: PgPool,
    cache: Mutex<HashMap<(String, String), (SearchTuning, Instant)>>,
}

impl AdaptiveSearchConfig {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, project: &str, database: &str) -> Result<SearchTuning> {
        let key = (project.to_string(), database.to_string());
        if let Some((tuning, cached_at)) = self.cache.lock().await.get(&key) {
            if cached_at.elapsed() < CACHE_TTL {
                return Ok(*tuning);
            }
        }
        self.refresh(project, database).await
    }

    pub async fn refresh(&self, project: &str, database: &str) -> Result<SearchTuning> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memories")
            .fetch_one(&self.pool)
            .await?;

        let tuning = tuning_for_count(count);
        self.cache.lock().await.insert(
            (project.to_string(), database.to_string()),
            (tuning, Instant::now()),
        );
        Ok(tuning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_corpus_has_zero_tuning() {
        let t = tuning_for_count(0);
        assert_eq!(t.threshold, 0.0);
        assert_eq!(t.limit, 0);
        assert!(!t.has_enough_data);
    }

    #[test]
    fn small_corpus_limit_caps_at_n() {
        let t = tuning_for_count(3);
        assert_eq!(t.limit, 3);
        assert!(!t.has_enough_data);
    }

    #[test]
    fn bracket_boundaries_match_table() {
        assert_eq!(tuning_for_count(99).threshold, 0.05);
        assert_eq!(tuning_for_count(100).threshold, 0.10);
        assert_eq!(tuning_for_count(999).threshold, 0.10);
        assert_eq!(tuning_for_count(1000).threshold, 0.15);
        assert_eq!(tuning_for_count(9999).threshold, 0.15);
        assert_eq!(tuning_for_count(10_000).threshold, 0.20);
        assert_eq!(tuning_for_count(49_999).threshold, 0.20);
        assert_eq!(tuning_for_count(50_000).threshold, 0.25);
    }

    #[test]
    fn has_enough_data_gates_at_min_vectors_for_semantic() {
        assert!(!tuning_for_count(MIN_VECTORS_FOR_SEMANTIC - 1).has_enough_data);
        assert!(tuning_for_count(MIN_VECTORS_FOR_SEMANTIC).has_enough_data);
    }

    #[test]
    fn large_corpus_quality_saturates_at_one() {
        assert_eq!(tuning_for_count(50_000).quality_score, 1.0);
        assert_eq!(tuning_for_count(1_000_000).quality_score, 1.0);
    }

    #[test]
    fn same_n_is_stable_within_a_call() {
        let a = tuning_for_count(5000);
        let b = tuning_for_count(5000);
        assert_eq!(a, b);
    }
}
