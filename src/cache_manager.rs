//! Cache de ressources avec LRU + TTL
//!
//! Fournit un cache thread-safe pour les poignees par profil:
//! - Eviction LRU (Least Recently Used) bornee par max_entries
//! - Expiration par inactivite (idle timeout)
//! - TTL dur optionnel
//! - Metriques d'observabilite (hits, misses, evictions)
//! - API d'eviction explicite
//!
//! Utilise `moka` - le cache le plus utilise en production Rust
//! (Cloudflare, Fastly, etc.)

use moka::sync::Cache;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration du cache
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Nombre maximum d'entrees en cache
    pub max_entries: u64,
    /// Duree d'inactivite avant eviction (en secondes)
    pub idle_timeout_secs: u64,
    /// Duree de vie maximale d'une entree (en secondes), independante des acces
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5,         // Max 5 profils en cache
            idle_timeout_secs: 600, // 10 minutes d'inactivite
            ttl_secs: Some(3600),   // 1 heure max
        }
    }
}

impl CacheConfig {
    /// Configuration pour les tests (valeurs reduites)
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            max_entries: 2,
            idle_timeout_secs: 1,
            ttl_secs: Some(2),
        }
    }
}

/// Metriques du cache pour observabilite
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    insertions: AtomicU64,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
        }
    }
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Obtenir un snapshot des metriques
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheMetricsSnapshot {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

/// Snapshot immutable des metriques pour serialisation
#[derive(Clone, Debug, Serialize)]
pub struct CacheMetricsSnapshot {
    /// Nombre de cache hits
    pub hits: u64,
    /// Nombre de cache misses
    pub misses: u64,
    /// Nombre d'evictions (LRU ou TTL)
    pub evictions: u64,
    /// Nombre d'insertions
    pub insertions: u64,
    /// Taux de hit en pourcentage
    pub hit_rate: f64,
}

/// Cache de poignees generique avec LRU + TTL
///
/// Thread-safe et non-bloquant grace a moka; l'eviction se fait en
/// background sans bloquer les operations. Les valeurs sont clonables
/// (Arc) et peuvent survivre a l'eviction tant qu'un appelant les detient.
pub struct ManagedCache<K, V>
where
    K: Hash + Eq + Send + Sync + Clone + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, V>,
    metrics: Arc<CacheMetrics>,
    config: CacheConfig,
    name: String,
}

impl<K, V> ManagedCache<K, V>
where
    K: Hash + Eq + Send + Sync + Clone + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creer un nouveau cache manage
    ///
    /// # Arguments
    /// * `name` - Nom du cache pour les logs
    /// * `config` - Configuration LRU/TTL
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        let name = name.into();
        let metrics = Arc::new(CacheMetrics::default());
        let metrics_for_listener = Arc::clone(&metrics);
        let name_for_listener = name.clone();

        let mut builder = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_idle(Duration::from_secs(config.idle_timeout_secs))
            .eviction_listener(move |key, _value, cause| {
                metrics_for_listener.record_eviction();
                log::debug!(
                    "[{}] cache eviction: {:?} (cause: {:?})",
                    name_for_listener,
                    key,
                    cause
                );
            });

        if let Some(ttl) = config.ttl_secs {
            builder = builder.time_to_live(Duration::from_secs(ttl));
        }

        Self {
            cache: builder.build(),
            metrics,
            config,
            name,
        }
    }

    /// Obtenir une valeur du cache
    ///
    /// Retourne None si la cle n'existe pas ou a expire
    pub fn get(&self, key: &K) -> Option<V> {
        match self.cache.get(key) {
            Some(v) => {
                self.metrics.record_hit();
                Some(v)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Inserer une valeur dans le cache
    ///
    /// Si la capacite max est atteinte, evince l'entree LRU
    pub fn insert(&self, key: K, value: V) {
        self.metrics.record_insertion();
        self.cache.insert(key, value);
    }

    /// Obtenir ou creer une valeur
    ///
    /// Si la cle existe, retourne la valeur en cache; sinon appelle
    /// `factory` pour creer la valeur, l'insere et la retourne.
    pub fn get_or_create<F, E>(&self, key: K, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }

        // Cache miss - creer la valeur
        let value = factory()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Evincer explicitement une entree du cache
    pub fn evict(&self, key: &K) {
        self.cache.invalidate(key);
    }

    /// Vider tout le cache
    pub fn clear_all(&self) {
        self.cache.invalidate_all();
    }

    /// Verifier la presence d'une cle (sans compter hit/miss)
    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Obtenir les metriques du cache
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Nombre d'entrees actuellement en cache
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtenir un rapport de statut complet
    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            name: self.name.clone(),
            entries: self.len(),
            max_entries: self.config.max_entries,
            idle_timeout_secs: self.config.idle_timeout_secs,
            ttl_secs: self.config.ttl_secs,
            metrics: self.metrics(),
        }
    }

    #[cfg(test)]
    fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

/// Statut complet d'un cache pour monitoring
#[derive(Clone, Debug, Serialize)]
pub struct CacheStatus {
    /// Nom du cache
    pub name: String,
    /// Nombre d'entrees actuelles
    pub entries: u64,
    /// Capacite maximale
    pub max_entries: u64,
    /// Timeout d'inactivite en secondes
    pub idle_timeout_secs: u64,
    /// TTL en secondes (None = pas de TTL)
    pub ttl_secs: Option<u64>,
    /// Metriques
    pub metrics: CacheMetricsSnapshot,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_basic_get_insert() {
        let cache: ManagedCache<String, i32> =
            ManagedCache::new("test", CacheConfig::for_testing());

        // Insert
        cache.insert("key1".to_string(), 42);
        assert_eq!(cache.len(), 1);

        // Get
        let value = cache.get(&"key1".to_string());
        assert_eq!(value, Some(42));

        // Miss
        let missing = cache.get(&"key2".to_string());
        assert_eq!(missing, None);

        // Metrics
        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.insertions, 1);
    }

    #[test]
    fn test_get_or_create() {
        let cache: ManagedCache<String, String> =
            ManagedCache::new("test", CacheConfig::for_testing());

        // First call - creates value
        let result: Result<String, ()> =
            cache.get_or_create("key1".to_string(), || Ok("value1".to_string()));
        assert_eq!(result, Ok("value1".to_string()));

        // Second call - returns cached value
        let result: Result<String, ()> = cache.get_or_create("key1".to_string(), || {
            panic!("Should not be called");
        });
        assert_eq!(result, Ok("value1".to_string()));

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[test]
    fn test_factory_error_is_not_cached() {
        let cache: ManagedCache<String, i32> =
            ManagedCache::new("test", CacheConfig::for_testing());

        let failed: Result<i32, String> =
            cache.get_or_create("key".to_string(), || Err("boom".to_string()));
        assert!(failed.is_err());
        assert!(!cache.contains(&"key".to_string()));

        let ok: Result<i32, String> = cache.get_or_create("key".to_string(), || Ok(7));
        assert_eq!(ok, Ok(7));
    }

    #[test]
    fn test_lru_eviction() {
        let config = CacheConfig {
            max_entries: 2,
            idle_timeout_secs: 3600, // Long timeout to test LRU only
            ttl_secs: None,
        };
        let cache: ManagedCache<String, i32> = ManagedCache::new("test", config);

        cache.insert("key1".to_string(), 1);
        cache.insert("key2".to_string(), 2);

        // Access key1 to make it more recent
        let _ = cache.get(&"key1".to_string());

        // Insert key3 - should evict key2 (LRU)
        cache.insert("key3".to_string(), 3);

        cache.run_pending_tasks();

        // key1 and key3 should exist
        assert!(cache.get(&"key1".to_string()).is_some());
        assert!(cache.get(&"key3".to_string()).is_some());
        // Note: LRU eviction is async, key2 might linger briefly
    }

    #[test]
    fn test_evict() {
        let cache: ManagedCache<String, i32> =
            ManagedCache::new("test", CacheConfig::for_testing());

        cache.insert("key1".to_string(), 42);
        assert!(cache.get(&"key1".to_string()).is_some());

        cache.evict(&"key1".to_string());
        assert!(cache.get(&"key1".to_string()).is_none());
    }

    #[test]
    fn test_clear_all() {
        let cache: ManagedCache<String, i32> =
            ManagedCache::new("test", CacheConfig::for_testing());

        cache.insert("key1".to_string(), 1);
        cache.insert("key2".to_string(), 2);
        assert_eq!(cache.len(), 2);

        cache.clear_all();
        cache.run_pending_tasks();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_idle_timeout() {
        let config = CacheConfig {
            max_entries: 10,
            idle_timeout_secs: 1, // 1 second
            ttl_secs: None,
        };
        let cache: ManagedCache<String, i32> = ManagedCache::new("test", config);

        cache.insert("key1".to_string(), 42);
        assert!(cache.get(&"key1".to_string()).is_some());

        // Wait for idle timeout
        thread::sleep(Duration::from_secs(2));
        cache.run_pending_tasks();

        // Should be evicted due to idle timeout
        assert!(cache.get(&"key1".to_string()).is_none());
    }

    #[test]
    fn test_status() {
        let cache: ManagedCache<String, i32> =
            ManagedCache::new("test_cache", CacheConfig::for_testing());

        cache.insert("key1".to_string(), 1);
        let _ = cache.get(&"key1".to_string());
        let _ = cache.get(&"missing".to_string());

        let status = cache.status();
        assert_eq!(status.name, "test_cache");
        assert_eq!(status.entries, 1);
        assert_eq!(status.max_entries, 2);
        assert_eq!(status.metrics.hits, 1);
        assert_eq!(status.metrics.misses, 1);
    }
}
