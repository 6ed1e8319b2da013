//! Contexte explicite du core
//!
//! Remplace les singletons de module par un objet construit: le Core
//! detient les deux caches de poignees par profil, le registre des jobs
//! d'indexation actifs, le bus d'evenements et le magasin de metriques.
//! Cycle de vie: `Core::new(config)` -> operations -> `shutdown()` (drain
//! des jobs, liberation des poignees).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::cache_manager::{CacheConfig, ManagedCache};
use crate::database::DatabaseManager;
use crate::errors::AppError;
use crate::events::{CoreEvent, EventBus, DEFAULT_EVENT_CAPACITY};
use crate::index_manager::IndexManager;
use crate::metrics_store::{MetricsStore, S3Pricing};
use crate::models::{IndexingConfig, S3MetricsEvent};

/// Delai de grace accorde a un job pour observer l'annulation et persister
/// son etat avant l'abort force
pub(crate) const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Configuration du Core
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Repertoire de donnees; None = <data-local-dir>/s3explorer
    pub data_dir: Option<PathBuf>,
    /// Configuration des caches de poignees (LRU + TTL)
    pub cache: CacheConfig,
    /// Valeurs par defaut de l'indexation initiale
    pub indexing: IndexingConfig,
    /// Tarification pour les estimations de cout
    pub pricing: S3Pricing,
    /// Capacite du canal d'evenements
    pub event_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache: CacheConfig::default(),
            indexing: IndexingConfig::default(),
            pricing: S3Pricing::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Job d'indexation actif, enregistre par (profil, bucket)
pub(crate) struct IndexTask {
    pub abort: AbortHandle,
    pub cancel_tx: broadcast::Sender<()>,
    #[allow(dead_code)]
    pub bucket_name: String,
    #[allow(dead_code)]
    pub started_at: i64,
}

/// Contexte du core, passe par reference a toutes les operations
pub struct Core {
    pub(crate) config: CoreConfig,
    data_dir: PathBuf,
    pub(crate) db_managers: ManagedCache<String, Arc<DatabaseManager>>,
    pub(crate) index_managers: ManagedCache<String, Arc<IndexManager>>,
    pub(crate) active_indexing: Arc<Mutex<HashMap<String, IndexTask>>>,
    events: EventBus,
    metrics: Arc<MetricsStore>,
}

impl Core {
    /// Construire le core et ouvrir le magasin de metriques
    pub fn new(config: CoreConfig) -> Result<Self, AppError> {
        let data_dir = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .ok_or_else(|| AppError::ConfigError("Cannot find data directory".to_string()))?
                .join("s3explorer"),
        };
        std::fs::create_dir_all(&data_dir)?;

        let metrics = Arc::new(MetricsStore::new(&data_dir)?);

        // Purge de retention au demarrage, hors du chemin de l'appelant
        {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || metrics.auto_purge_on_startup());
        }

        let events = EventBus::new(config.event_capacity);
        let db_managers = ManagedCache::new("DatabaseManagers", config.cache.clone());
        let index_managers = ManagedCache::new("IndexManagers", config.cache.clone());

        Ok(Self {
            config,
            data_dir,
            db_managers,
            index_managers,
            active_indexing: Arc::new(Mutex::new(HashMap::new())),
            events,
            metrics,
        })
    }

    /// Repertoire de donnees effectif
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Acces au bus d'evenements
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// S'abonner au flux d'evenements du core
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Acces direct au magasin de metriques (requetes de dashboard)
    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    /// Obtenir ou creer le gestionnaire de base pour un profil
    pub fn db_manager(&self, profile_id: &str) -> Result<Arc<DatabaseManager>, AppError> {
        let data_dir = self.data_dir.clone();
        let profile = profile_id.to_string();
        self.db_managers.get_or_create(profile_id.to_string(), || {
            Ok(Arc::new(DatabaseManager::new(&data_dir, &profile)?))
        })
    }

    /// Obtenir ou creer le gestionnaire d'indexation pour un profil
    pub fn index_manager(&self, profile_id: &str) -> Result<Arc<IndexManager>, AppError> {
        let db = self.db_manager(profile_id)?;
        self.index_managers
            .get_or_create(profile_id.to_string(), || Ok(Arc::new(IndexManager::new(db))))
    }

    /// Cle du registre des jobs actifs
    pub(crate) fn index_key(profile_id: &str, bucket_name: &str) -> String {
        format!("{}-{}", profile_id, bucket_name)
    }

    /// Publier une metrique de requete: evenement live + persistance
    /// fire-and-forget (jamais bloquant, jamais propage)
    pub fn record_request_metric(&self, event: S3MetricsEvent) {
        self.events.emit(CoreEvent::RequestMetric(event.clone()));

        let metrics = Arc::clone(&self.metrics);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = metrics.record_request(&event) {
                        log::debug!("Failed to persist request metric: {}", e);
                    }
                });
            }
            Err(_) => {
                // Pas de runtime (appel synchrone): ecrire en place
                if let Err(e) = metrics.record_request(&event) {
                    log::debug!("Failed to persist request metric: {}", e);
                }
            }
        }
    }

    /// Publier un cache hit servi par l'index (fire-and-forget)
    pub(crate) fn record_cache_hit(
        &self,
        operation: &str,
        profile_id: &str,
        bucket_name: &str,
        saved_requests: i32,
    ) {
        let metrics = Arc::clone(&self.metrics);
        let operation = operation.to_string();
        let profile = profile_id.to_string();
        let bucket = bucket_name.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    metrics.emit_cache_hit(&operation, Some(&profile), Some(&bucket), saved_requests);
                });
            }
            Err(_) => {
                metrics.emit_cache_hit(&operation, Some(&profile), Some(&bucket), saved_requests);
            }
        }
    }

    /// Annuler et attendre les jobs d'indexation selectionnes par `predicate`
    ///
    /// Envoie l'annulation, accorde le delai de grace pour la persistance,
    /// puis force l'abort. Utilise par l'eviction de cache et le shutdown.
    pub(crate) async fn drain_jobs<P>(&self, predicate: P)
    where
        P: Fn(&str) -> bool,
    {
        let drained: Vec<(String, IndexTask)> = {
            let mut registry = match self.active_indexing.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let keys: Vec<String> = registry
                .keys()
                .filter(|k| predicate(k.as_str()))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| registry.remove(&k).map(|t| (k, t)))
                .collect()
        };

        for (key, task) in drained {
            let _ = task.cancel_tx.send(());

            let deadline = tokio::time::Instant::now() + CANCEL_GRACE;
            while !task.abort.is_finished() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            task.abort.abort();

            log::debug!("Drained indexing job '{}'", key);
        }
    }

    /// Liberer les ressources d'un profil
    ///
    /// Draine d'abord les jobs d'indexation du profil, puis evince ses
    /// poignees des deux caches.
    pub async fn cleanup_profile_cache(&self, profile_id: &str) {
        let job_prefix = format!("{}-", profile_id);
        self.drain_jobs(|key| key.starts_with(&job_prefix)).await;

        self.index_managers.evict(&profile_id.to_string());
        self.db_managers.evict(&profile_id.to_string());
    }

    /// Vider tous les caches de poignees (maintenance)
    pub async fn clear_all_caches(&self) {
        self.drain_jobs(|_| true).await;

        self.index_managers.clear_all();
        self.db_managers.clear_all();
    }

    /// Arret propre: drain des jobs puis liberation des poignees
    pub async fn shutdown(&self) {
        self.clear_all_caches().await;
        log::info!("Core shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_core() -> (tempfile::TempDir, Core) {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        (dir, Core::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_handle_caches_are_shared() {
        let (_dir, core) = test_core();

        let a = core.index_manager("profile-a").unwrap();
        let b = core.index_manager("profile-a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let status = core.db_managers.status();
        assert!(status.metrics.insertions >= 1);
    }

    #[tokio::test]
    async fn test_cleanup_profile_evicts_handles() {
        let (_dir, core) = test_core();

        let _ = core.index_manager("profile-a").unwrap();
        assert!(core.index_managers.contains(&"profile-a".to_string()));

        core.cleanup_profile_cache("profile-a").await;
        assert!(!core.index_managers.contains(&"profile-a".to_string()));
        assert!(!core.db_managers.contains(&"profile-a".to_string()));
    }

    #[tokio::test]
    async fn test_record_request_metric_is_fire_and_forget() {
        let (_dir, core) = test_core();
        let mut rx = core.subscribe();

        let event = S3MetricsEvent::new(
            crate::models::S3Operation::ListObjectsV2,
            crate::models::RequestCategory::LIST,
        );
        core.record_request_metric(event);

        // L'evenement live part immediatement
        match rx.recv().await.unwrap() {
            CoreEvent::RequestMetric(e) => assert!(e.success),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
