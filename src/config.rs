//! Environment-driven configuration (spec §6 env var table).
//!
//! Mirrors the teacher's own preference for reading process state directly
//! at the point of use rather than threading a config file through the
//! binary — the difference here is that every knob is a documented env var
//! instead of a derived filesystem path.

use std::env;
use std::time::Duration;

/// Authoritative active project path resolution order (spec §4.1):
/// `SPECMEM_PROJECT_PATH`, then cwd, then `/` as a last resort. Resolved
/// *per call*, never cached — a long-lived process must support swapping
/// projects via [`crate::project::ProjectContext::with_project`].
pub fn resolve_active_project_path() -> String {
    if let Ok(p) = env::var("SPECMEM_PROJECT_PATH") {
        if !p.is_empty() {
            return p;
        }
    }
    if let Ok(cwd) = env::current_dir() {
        return cwd.to_string_lossy().into_owned();
    }
    "/".to_string()
}

/// Hard override for the canonical embedding dimension. `Some(d)` only when
/// the env var is set and parses to a positive integer — per spec §4.2 this
/// is the only acceptable short-circuit around `pg_attribute` introspection.
pub fn embedding_dimensions_override() -> Option<usize> {
    env::var("SPECMEM_EMBEDDING_DIMENSIONS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|d| *d > 0)
        .map(|d| d as usize)
}

fn env_duration_ms(var: &str, default_ms: u64) -> Duration {
    let ms = env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn env_usize(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

/// Dimension cache TTL (default 5 min).
pub fn dimension_cache_ttl() -> Duration {
    env_duration_ms("SPECMEM_DIMENSION_CACHE_TTL_MS", 300_000)
}

/// Drilldown registry cap (default 10 000).
pub fn drilldown_max_size() -> usize {
    env_usize("SPECMEM_DRILLDOWN_MAX_SIZE", 10_000)
}

/// Drilldown entry TTL (default 30 min).
pub fn drilldown_ttl() -> Duration {
    env_duration_ms("SPECMEM_DRILLDOWN_TTL_MS", 1_800_000)
}

/// Drilldown sweep interval (default 5 min).
pub fn drilldown_cleanup_interval() -> Duration {
    env_duration_ms("SPECMEM_DRILLDOWN_CLEANUP_INTERVAL_MS", 300_000)
}

/// Embedding queue callback cap (default 500).
pub fn embed_queue_max_size() -> usize {
    env_usize("SPECMEM_EMBED_QUEUE_MAX_SIZE", 500)
}

/// Embedding queue callback TTL (default 5 min).
pub fn embed_queue_max_age() -> Duration {
    env_duration_ms("SPECMEM_EMBED_QUEUE_MAX_AGE_MS", 300_000)
}

/// Embedding queue sweep interval (default 1 min).
pub fn embed_queue_cleanup_interval() -> Duration {
    env_duration_ms("SPECMEM_EMBED_QUEUE_CLEANUP_INTERVAL_MS", 60_000)
}

/// Initializes the global `tracing` subscriber the way the teacher's `main`
/// does: `RUST_LOG`-driven filter defaulting to INFO, stderr writer so
/// stdout stays free for any wire protocol a caller layers on top.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env var mutation races across tests in the same process; serialize it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn dimension_override_requires_positive() {
        let _g = ENV_LOCK.lock().unwrap();
        env::remove_var("SPECMEM_EMBEDDING_DIMENSIONS");
        assert_eq!(embedding_dimensions_override(), None);

        env::set_var("SPECMEM_EMBEDDING_DIMENSIONS", "0");
        assert_eq!(embedding_dimensions_override(), None);

        env::set_var("SPECMEM_EMBEDDING_DIMENSIONS", "-5");
        assert_eq!(embedding_dimensions_override(), None);

        env::set_var("SPECMEM_EMBEDDING_DIMENSIONS", "1536");
        assert_eq!(embedding_dimensions_override(), Some(1536));
        env::remove_var("SPECMEM_EMBEDDING_DIMENSIONS");
    }

    #[test]
    fn defaults_match_spec_table() {
        let _g = ENV_LOCK.lock().unwrap();
        for var in [
            "SPECMEM_DIMENSION_CACHE_TTL_MS",
            "SPECMEM_DRILLDOWN_MAX_SIZE",
            "SPECMEM_DRILLDOWN_TTL_MS",
            "SPECMEM_DRILLDOWN_CLEANUP_INTERVAL_MS",
            "SPECMEM_EMBED_QUEUE_MAX_SIZE",
            "SPECMEM_EMBED_QUEUE_MAX_AGE_MS",
            "SPECMEM_EMBED_QUEUE_CLEANUP_INTERVAL_MS",
        ] {
            env::remove_var(var);
        }
        assert_eq!(dimension_cache_ttl(), Duration::from_millis(300_000));
        assert_eq!(drilldown_max_size(), 10_000);
        assert_eq!(drilldown_ttl(), Duration::from_millis(1_800_000));
        assert_eq!(drilldown_cleanup_interval(), Duration::from_millis(300_000));
        assert_eq!(embed_queue_max_size(), 500);
        assert_eq!(embed_queue_max_age(), Duration::from_millis(300_000));
        assert_eq!(embed_queue_cleanup_interval(), Duration::from_millis(60_000));
    }
}
