//! DrilldownRegistry (spec §4.5, component C6): short-lived integer handles
//! that let a caller fetch the full-resolution memory or code behind a
//! Camera Roll summary line.
//!
//! The key is a string rather than a typed id because a `memory` entry's
//! key is a memory UUID's string form while a `code` entry's key is a raw
//! `"filePath[:defName]"` (spec §4.6) — the registry itself is agnostic to
//! which.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::config;
use crate::models::DrilldownType;

/// Optional context carried alongside a handle (spec §4.5 Drilldown Entry).
#[derive(Debug, Clone, Default)]
pub struct DrilldownContext {
    pub parent_id: Option<i64>,
    pub search_query: Option<String>,
    pub zoom_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: i64,
    pub key: String,
    pub kind: DrilldownType,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub parent_id: Option<i64>,
    pub search_query: Option<String>,
    pub zoom_level: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrilldownStats {
    pub live_entries: usize,
    pub max_size: usize,
}

/// Maps short-lived integer handles to memory/code keys and back, with LRU
/// eviction at capacity and a TTL sweep (spec §4.5). One instance per
/// project, like every other per-project component in this crate.
pub struct DrilldownRegistry {
    max_size: usize,
    ttl: Duration,
    next_id: AtomicI64,
    registry: RwLock<HashMap<i64, Entry>>,
    reverse: RwLock<HashMap<(String, DrilldownType), i64>>,
    /// Least-recently-accessed first, for LRU eviction. Reordered on every
    /// `touch` so eviction drops the coldest entries, not the oldest.
    order: RwLock<Vec<i64>>,
}

impl DrilldownRegistry {
    pub fn new() -> Self {
        Self {
            max_size: config::drilldown_max_size(),
            ttl: config::drilldown_ttl(),
            next_id: AtomicI64::new(1),
            registry: RwLock::new(HashMap::new()),
            reverse: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Returns an existing id for `(key, kind)` if already registered,
    /// touching it; else mints a new one. Evicts the least-recently-accessed
    /// 20% of entries first if the registry is at capacity (spec §4.5).
    pub async fn register(&self, key: impl Into<String>, kind: DrilldownType, ctx: DrilldownContext) -> i64 {
        let key = key.into();
        if let Some(id) = self.reverse.read().await.get(&(key.clone(), kind)).copied() {
            self.touch(id).await;
            return id;
        }

        if self.registry.read().await.len() >= self.max_size {
            self.evict_oldest_fraction(0.2).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        self.registry.write().await.insert(
            id,
            Entry {
                id,
                key: key.clone(),
                kind,
                created_at: now,
                last_accessed: now,
                access_count: 1,
                parent_id: ctx.parent_id,
                search_query: ctx.search_query,
                zoom_level: ctx.zoom_level,
            },
        );
        self.reverse.write().await.insert((key, kind), id);
        self.order.write().await.push(id);
        id
    }

    /// Resolves a handle, touching it (bumps `access_count`, refreshes
    /// `last_accessed`). Accepts either the decimal id or a case-insensitive
    /// hex prefix of a normalized (dashes-stripped) key — ties resolve to
    /// the first-created match (spec §4.5).
    pub async fn resolve(&self, handle: &str) -> Option<Entry> {
        let id = if let Ok(id) = handle.parse::<i64>() {
            if self.registry.read().await.contains_key(&id) {
                Some(id)
            } else {
                None
            }
        } else {
            let prefix = handle.to_lowercase();
            let registry = self.registry.read().await;
            registry
                .values()
                .filter(|e| e.key.replace('-', "").to_lowercase().starts_with(&prefix))
                .min_by_key(|e| e.created_at)
                .map(|e| e.id)
        }?;

        self.touch(id).await;
        self.registry.read().await.get(&id).cloned()
    }

    async fn touch(&self, id: i64) {
        if let Some(entry) = self.registry.write().await.get_mut(&id) {
            entry.last_accessed = Instant::now();
            entry.access_count += 1;
        } else {
            return;
        }
        let mut order = self.order.write().await;
        if let Some(pos) = order.iter().position(|&x| x == id) {
            order.remove(pos);
        }
        order.push(id);
    }

    pub async fn stats(&self) -> DrilldownStats {
        DrilldownStats {
            live_entries: self.registry.read().await.len(),
            max_size: self.max_size,
        }
    }

    pub async fn clear(&self) {
        self.registry.write().await.clear();
        self.reverse.write().await.clear();
        self.order.write().await.clear();
    }

    /// Removes entries whose `last_accessed` age exceeds the TTL. Intended
    /// to run on an unref'd interval timer owned by the caller (spec §4.5) —
    /// this registry never starts its own timer, it only exposes the sweep.
    pub async fn sweep_expired(&self) {
        let expired: Vec<i64> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .filter(|(_, e)| e.last_accessed.elapsed() >= self.ttl)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &expired {
            self.remove(*id).await;
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired drilldown entries");
        }
    }

    /// Evicts the least-recently-accessed `fraction` of entries (`order`'s
    /// front, refreshed on every `touch`).
    async fn evict_oldest_fraction(&self, fraction: f64) {
        let mut order = self.order.write().await;
        let evict_count = ((order.len() as f64) * fraction).ceil() as usize;
        let to_evict: Vec<i64> = order.drain(..evict_count.min(order.len())).collect();
        drop(order);
        for id in to_evict {
            self.remove_locked(id).await;
        }
    }

    async fn remove(&self, id: i64) {
        self.order.write().await.retain(|&x| x != id);
        self.remove_locked(id).await;
    }

    async fn remove_locked(&self, id: i64) {
        if let Some(entry) = self.registry.write().await.remove(&id) {
            self.reverse.write().await.remove(&(entry.key, entry.kind));
        }
    }
}

impl Default for DrilldownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent_for_the_same_key_and_type() {
        let registry = DrilldownRegistry::new();
        let key = uuid::Uuid::new_v4().to_string();
        let a = registry.register(key.clone(), DrilldownType::Memory, DrilldownContext::default()).await;
        let b = registry.register(key, DrilldownType::Memory, DrilldownContext::default()).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn repeated_registration_bumps_access_count() {
        let registry = DrilldownRegistry::new();
        let key = uuid::Uuid::new_v4().to_string();
        registry.register(key.clone(), DrilldownType::Memory, DrilldownContext::default()).await;
        registry.register(key.clone(), DrilldownType::Memory, DrilldownContext::default()).await;
        let entry = registry.resolve(&key.replace('-', "")[..8]).await.unwrap();
        assert!(entry.access_count >= 3);
    }

    #[tokio::test]
    async fn same_key_different_type_gets_a_different_handle() {
        let registry = DrilldownRegistry::new();
        let key = uuid::Uuid::new_v4().to_string();
        let a = registry.register(key.clone(), DrilldownType::Memory, DrilldownContext::default()).await;
        let b = registry.register(key, DrilldownType::Code, DrilldownContext::default()).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn resolve_by_decimal_id() {
        let registry = DrilldownRegistry::new();
        let key = uuid::Uuid::new_v4().to_string();
        let id = registry.register(key.clone(), DrilldownType::Context, DrilldownContext::default()).await;
        let resolved = registry.resolve(&id.to_string()).await.unwrap();
        assert_eq!(resolved.key, key);
        assert_eq!(resolved.kind, DrilldownType::Context);
    }

    #[tokio::test]
    async fn resolve_by_hex_prefix() {
        let registry = DrilldownRegistry::new();
        let key = uuid::Uuid::new_v4().to_string();
        registry.register(key.clone(), DrilldownType::Memory, DrilldownContext::default()).await;
        let prefix = &key.replace('-', "")[..8];
        let resolved = registry.resolve(prefix).await.unwrap();
        assert_eq!(resolved.key, key);
    }

    #[tokio::test]
    async fn resolve_non_uuid_code_key_by_decimal_id() {
        let registry = DrilldownRegistry::new();
        let id = registry
            .register("/home/user/src/lib.rs:my_fn", DrilldownType::Code, DrilldownContext::default())
            .await;
        let resolved = registry.resolve(&id.to_string()).await.unwrap();
        assert_eq!(resolved.key, "/home/user/src/lib.rs:my_fn");
    }

    #[tokio::test]
    async fn resolve_unknown_handle_is_none() {
        let registry = DrilldownRegistry::new();
        assert!(registry.resolve("999999").await.is_none());
        assert!(registry.resolve("deadbeef").await.is_none());
    }

    #[tokio::test]
    async fn eviction_drops_least_recently_accessed_not_oldest_inserted() {
        let registry = DrilldownRegistry {
            max_size: 4,
            ..DrilldownRegistry::new()
        };
        let first = registry.register("first", DrilldownType::Code, DrilldownContext::default()).await;
        let second = registry.register("second", DrilldownType::Code, DrilldownContext::default()).await;
        let third = registry.register("third", DrilldownType::Code, DrilldownContext::default()).await;
        let fourth = registry.register("fourth", DrilldownType::Code, DrilldownContext::default()).await;

        // Touch the oldest-inserted entry so it is no longer the coldest.
        registry.resolve(&first.to_string()).await;

        // Registering a fifth entry at capacity evicts the least-recently
        // accessed 20% (1 entry): "second", not "first".
        registry.register("fifth", DrilldownType::Code, DrilldownContext::default()).await;

        assert!(registry.resolve(&first.to_string()).await.is_some());
        assert!(registry.resolve(&second.to_string()).await.is_none());
        assert!(registry.resolve(&third.to_string()).await.is_some());
        assert!(registry.resolve(&fourth.to_string()).await.is_some());
    }

    #[tokio::test]
    async fn clear_empties_every_map() {
        let registry = DrilldownRegistry::new();
        registry
            .register(uuid::Uuid::new_v4().to_string(), DrilldownType::Memory, DrilldownContext::default())
            .await;
        registry.clear().await;
        let stats = registry.stats().await;
        assert_eq!(stats.live_entries, 0);
    }
}
