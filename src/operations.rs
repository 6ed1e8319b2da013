//! Surface d'operations du core
//!
//! Requetes typees consommees par l'hote (UI via IPC, service, tests):
//! indexation initiale, reconciliation des listings, notifications
//! optimistes, controle des caches et requetes de metriques. Chaque
//! operation acquiert ses poignees via le Core et emet ses evenements sur
//! le bus type.

use std::sync::Arc;
use std::time::Instant;

use crate::core::{Core, IndexTask, CANCEL_GRACE};
use crate::errors::AppError;
use crate::events::{CoreEvent, IndexProgressEvent, IndexStatus, ObjectCompletedEvent};
use crate::listing::ObjectLister;
use crate::metrics_store::{
    BucketUsageStats, CacheEvent, CacheSummary, DailyCacheStats, DailyStats, ErrorStats,
    HourlyStats, OperationStats, RequestRecord, S3Pricing, StorageInfo,
};
use crate::models::{
    categorize_s3_error, BucketIndexMetadata, BucketIndexStats, IndexingConfig,
    InitialIndexResult, ListObjectsResponse, PrefixStats, PrefixStatus, RequestCategory,
    S3MetricsEvent, S3Object, S3Operation,
};
use crate::validation;

/// Statut agrege des deux caches de poignees
#[derive(Debug, serde::Serialize)]
pub struct AllCachesStatus {
    pub database_managers: crate::cache_manager::CacheStatus,
    pub index_managers: crate::cache_manager::CacheStatus,
}

impl Core {
    // ========================================================================
    // Index Management Operations
    // ========================================================================

    /// Lancer l'indexation initiale d'un bucket
    ///
    /// Le driver tourne en tache detachee par (profil, bucket); une seule a
    /// la fois, sinon `IndexingAlreadyInProgress`. L'appel attend la fin du
    /// job et retourne le resultat; la progression est diffusee sur le bus.
    pub async fn start_initial_index(
        &self,
        lister: Arc<dyn ObjectLister>,
        profile_id: &str,
        bucket_name: &str,
        max_requests: Option<u32>,
        batch_size: Option<i32>,
    ) -> Result<InitialIndexResult, AppError> {
        validation::validate_bucket_name(bucket_name)?;

        let index_key = Self::index_key(profile_id, bucket_name);

        // Refuser un second job pour le meme (profil, bucket)
        {
            let registry = self
                .active_indexing
                .lock()
                .map_err(|e| AppError::Unknown(e.to_string()))?;
            if registry.contains_key(&index_key) {
                return Err(AppError::IndexingAlreadyInProgress(bucket_name.to_string()));
            }
        }

        let config = IndexingConfig {
            max_initial_requests: max_requests.unwrap_or(self.config.indexing.max_initial_requests),
            batch_size: batch_size.unwrap_or(self.config.indexing.batch_size),
            stale_ttl_hours: self.config.indexing.stale_ttl_hours,
        }
        .clamped();

        let index_mgr = self.index_manager(profile_id)?;

        let (cancel_tx, cancel_rx) = tokio::sync::broadcast::channel::<()>(1);
        let sink = self.events().sink();

        sink.emit(CoreEvent::IndexProgress(IndexProgressEvent {
            profile_id: profile_id.to_string(),
            bucket_name: bucket_name.to_string(),
            objects_indexed: 0,
            requests_made: 0,
            max_requests: config.max_initial_requests,
            is_complete: false,
            status: IndexStatus::Starting,
            error: None,
        }));

        // Tache detachee: le registre garde l'abort handle et l'emetteur
        // d'annulation pour cancel_indexing
        let task_profile = profile_id.to_string();
        let task_bucket = bucket_name.to_string();
        let task_config = config.clone();
        let progress_sink = sink.clone();
        let mgr = Arc::clone(&index_mgr);

        let handle = tokio::spawn(async move {
            let event_profile = task_profile.clone();
            let event_bucket = task_bucket.clone();
            mgr.initial_index_bucket(
                &*lister,
                &task_bucket,
                &task_config,
                move |objects_indexed, requests_made, max_requests| {
                    progress_sink.emit(CoreEvent::IndexProgress(IndexProgressEvent {
                        profile_id: event_profile.clone(),
                        bucket_name: event_bucket.clone(),
                        objects_indexed,
                        requests_made,
                        max_requests,
                        is_complete: false,
                        status: IndexStatus::Indexing,
                        error: None,
                    }));
                },
                Some(cancel_rx),
            )
            .await
        });

        {
            let mut registry = self
                .active_indexing
                .lock()
                .map_err(|e| AppError::Unknown(e.to_string()))?;
            registry.insert(
                index_key.clone(),
                IndexTask {
                    abort: handle.abort_handle(),
                    cancel_tx,
                    bucket_name: bucket_name.to_string(),
                    started_at: chrono::Utc::now().timestamp_millis(),
                },
            );
        }

        let join_result = handle.await;

        // Retirer du registre (deja fait si cancel_indexing est passe avant)
        {
            if let Ok(mut registry) = self.active_indexing.lock() {
                registry.remove(&index_key);
            }
        }

        match join_result {
            Ok(Ok(result)) => {
                let status = if result.cancelled {
                    IndexStatus::Cancelled
                } else if result.is_complete {
                    IndexStatus::Completed
                } else {
                    IndexStatus::Partial
                };

                sink.emit(CoreEvent::IndexProgress(IndexProgressEvent {
                    profile_id: profile_id.to_string(),
                    bucket_name: bucket_name.to_string(),
                    objects_indexed: result.total_indexed,
                    requests_made: result.requests_made,
                    max_requests: config.max_initial_requests,
                    is_complete: result.is_complete,
                    status,
                    error: result.error.clone(),
                }));

                // Une metrique LIST par requete consommee par le scan
                for _ in 0..result.requests_made {
                    let mut event =
                        S3MetricsEvent::new(S3Operation::ListObjectsV2, RequestCategory::LIST)
                            .with_bucket(bucket_name);
                    event.profile_id = Some(profile_id.to_string());
                    self.record_request_metric(event);
                }

                Ok(result)
            }
            Ok(Err(e)) => {
                sink.emit(CoreEvent::IndexProgress(IndexProgressEvent {
                    profile_id: profile_id.to_string(),
                    bucket_name: bucket_name.to_string(),
                    objects_indexed: 0,
                    requests_made: 0,
                    max_requests: config.max_initial_requests,
                    is_complete: false,
                    status: IndexStatus::Failed,
                    error: Some(e.to_string()),
                }));
                Err(e)
            }
            Err(join_err) if join_err.is_cancelled() => {
                // Abort force apres le delai de grace: les pages deja
                // persistees sont intactes, le token de reprise aussi
                sink.emit(CoreEvent::IndexProgress(IndexProgressEvent {
                    profile_id: profile_id.to_string(),
                    bucket_name: bucket_name.to_string(),
                    objects_indexed: 0,
                    requests_made: 0,
                    max_requests: config.max_initial_requests,
                    is_complete: false,
                    status: IndexStatus::Cancelled,
                    error: Some("Indexing task aborted".to_string()),
                }));
                Ok(InitialIndexResult {
                    total_indexed: 0,
                    is_complete: false,
                    requests_made: 0,
                    continuation_token: None,
                    last_key: None,
                    total_size: 0,
                    cancelled: true,
                    error: Some("Indexing task aborted".to_string()),
                })
            }
            Err(join_err) => Err(AppError::IndexError(format!(
                "Indexing task panicked: {}",
                join_err
            ))),
        }
    }

    /// Annuler un job d'indexation actif
    ///
    /// Envoie le signal cooperatif, accorde ~100 ms au driver pour
    /// persister son etat, puis force l'abort. L'index partiel est
    /// conserve et reprenable. `NoSuchIndexingJob` si rien ne tourne.
    pub async fn cancel_indexing(
        &self,
        profile_id: &str,
        bucket_name: &str,
    ) -> Result<(), AppError> {
        let index_key = Self::index_key(profile_id, bucket_name);

        let task = {
            let mut registry = self
                .active_indexing
                .lock()
                .map_err(|e| AppError::Unknown(e.to_string()))?;
            registry.remove(&index_key)
        };

        let task = match task {
            Some(task) => task,
            None => return Err(AppError::NoSuchIndexingJob(bucket_name.to_string())),
        };

        let _ = task.cancel_tx.send(());

        // Evenement immediat pour une UI reactive; le terminal du job suit
        self.events()
            .emit(CoreEvent::IndexProgress(IndexProgressEvent {
                profile_id: profile_id.to_string(),
                bucket_name: bucket_name.to_string(),
                objects_indexed: 0,
                requests_made: 0,
                max_requests: 0,
                is_complete: false,
                status: IndexStatus::Cancelled,
                error: Some("Indexing cancelled by user".to_string()),
            }));

        let deadline = tokio::time::Instant::now() + CANCEL_GRACE;
        while !task.abort.is_finished() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        task.abort.abort();

        Ok(())
    }

    /// Statistiques d'un bucket depuis l'index local
    pub fn get_bucket_index_stats(
        &self,
        profile_id: &str,
        bucket_name: &str,
    ) -> Result<BucketIndexStats, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        let stats = index_mgr.get_bucket_stats(bucket_name)?;

        // Servi par l'index: estimer les requetes LIST economisees
        let saved_requests = ((stats.total_objects as f64 / 1000.0).ceil() as i32).max(1);
        self.record_cache_hit("BucketStats", profile_id, bucket_name, saved_requests);

        Ok(stats)
    }

    /// Statistiques d'un prefixe (dossier) depuis l'index local
    pub fn get_prefix_index_stats(
        &self,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<PrefixStats, AppError> {
        validation::validate_prefix(prefix)?;

        let index_mgr = self.index_manager(profile_id)?;
        let stats = index_mgr.get_prefix_stats(bucket_name, prefix)?;

        let saved_requests = ((stats.objects_count as f64 / 1000.0).ceil() as i32).max(1);
        self.record_cache_hit("PrefixStats", profile_id, bucket_name, saved_requests);

        Ok(stats)
    }

    /// Vider l'index d'un bucket (pour re-indexation)
    pub fn clear_bucket_index(&self, profile_id: &str, bucket_name: &str) -> Result<(), AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.clear_bucket_index(bucket_name)
    }

    /// Verifier si un bucket a deja ete indexe
    pub fn is_bucket_indexed(&self, profile_id: &str, bucket_name: &str) -> Result<bool, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.is_bucket_indexed(bucket_name)
    }

    /// Verifier si l'index d'un bucket est recursivement complet
    pub fn is_bucket_index_complete(
        &self,
        profile_id: &str,
        bucket_name: &str,
    ) -> Result<bool, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.is_bucket_complete(bucket_name)
    }

    /// Verifier si un prefixe est connu de l'index
    pub fn is_prefix_known(
        &self,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<bool, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.is_prefix_known(bucket_name, prefix)
    }

    /// Verifier si un prefixe est seulement decouvert (jamais explore)
    pub fn is_prefix_discovered_only(
        &self,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<bool, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.is_prefix_discovered_only(bucket_name, prefix)
    }

    /// Obtenir le statut brut d'un prefixe
    pub fn get_prefix_status(
        &self,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<Option<PrefixStatus>, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.get_prefix_status(bucket_name, prefix)
    }

    /// Rechercher des objets dans l'index (sous-chaine, case-insensitive)
    pub fn search_objects_in_index(
        &self,
        profile_id: &str,
        bucket_name: &str,
        query: &str,
        prefix: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<S3Object>, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        let results = index_mgr.search_objects(bucket_name, query, prefix, limit)?;

        self.record_cache_hit("Search", profile_id, bucket_name, 1);

        Ok(results)
    }

    /// Inventaire des index de buckets du profil
    pub fn get_all_bucket_indexes(
        &self,
        profile_id: &str,
    ) -> Result<Vec<BucketIndexMetadata>, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.get_all_bucket_indexes()
    }

    /// Taille sur disque de la base d'index d'un profil
    pub fn get_index_file_size(&self, profile_id: &str) -> Result<u64, AppError> {
        crate::database::DatabaseManager::get_db_file_size(self.data_dir(), profile_id)
    }

    /// Purger les entrees d'index obsoletes d'un bucket
    pub fn purge_stale_objects(
        &self,
        profile_id: &str,
        bucket_name: &str,
        stale_hours: Option<u32>,
    ) -> Result<i64, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        let hours = stale_hours.unwrap_or(self.config.indexing.stale_ttl_hours);
        index_mgr.purge_stale_objects(bucket_name, hours)
    }

    /// Nettoyer les prefix_status orphelins d'un bucket (maintenance)
    pub fn cleanup_orphan_prefixes(
        &self,
        profile_id: &str,
        bucket_name: &str,
    ) -> Result<i64, AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.cleanup_orphan_prefixes(bucket_name)
    }

    // ========================================================================
    // Listing Reconciliation
    // ========================================================================

    /// Lister les objets d'un bucket et reconcilier l'index
    ///
    /// Le listing vient du collaborateur; l'index est mis a jour avec la
    /// page. Si `sync_index` est vrai et que la page est la premiere et
    /// complete (pas de token entrant, non tronquee), les objets fantomes
    /// du niveau sont aussi balayes.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_objects(
        &self,
        lister: &dyn ObjectLister,
        profile_id: &str,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
        use_delimiter: Option<bool>,
        sync_index: Option<bool>,
    ) -> Result<ListObjectsResponse, AppError> {
        validation::validate_bucket_name(bucket)?;

        let started = Instant::now();
        let result = lister
            .list_objects(
                bucket,
                prefix,
                continuation_token.clone(),
                max_keys,
                use_delimiter.unwrap_or(true),
            )
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut metric = S3MetricsEvent::new(S3Operation::ListObjectsV2, RequestCategory::LIST)
            .with_duration(duration_ms)
            .with_bucket(bucket);
        metric.profile_id = Some(profile_id.to_string());

        match &result {
            Ok(response) => {
                metric = metric.with_objects_affected(response.objects.len() as u32);
                self.record_request_metric(metric);

                let index_mgr = self.index_manager(profile_id)?;
                let prefix_str = prefix.unwrap_or("");

                if sync_index.unwrap_or(false)
                    && continuation_token.is_none()
                    && !response.is_truncated
                {
                    // Vue complete du niveau: reconciliation avec balayage
                    index_mgr.sync_listing_page(bucket, prefix_str, response)?;
                } else {
                    index_mgr.update_from_list_response(bucket, prefix_str, response)?;
                }
            }
            Err(e) => {
                let category = categorize_s3_error(&e.to_string());
                self.record_request_metric(metric.with_error(category, &e.to_string()));
                // Le listing a echoue: l'index n'est pas mute
            }
        }

        result
    }

    // ========================================================================
    // Optimistic Notifications
    // ========================================================================

    /// Refleter un upload reussi dans l'index
    ///
    /// Emis par le pipeline d'upload externe une fois l'objet materialise.
    pub fn notify_object_uploaded(
        &self,
        profile_id: &str,
        bucket_name: &str,
        key: &str,
        size: i64,
        content_type: Option<&str>,
    ) -> Result<(), AppError> {
        let index_mgr = self.index_manager(profile_id)?;

        let obj = S3Object {
            key: key.to_string(),
            size,
            last_modified: Some(chrono::Utc::now().timestamp_millis()),
            storage_class: None,
            e_tag: None,
            is_folder: key.ends_with('/'),
        };
        index_mgr.add_object(bucket_name, &obj)?;

        self.events()
            .emit(CoreEvent::ObjectCompleted(ObjectCompletedEvent {
                profile_id: profile_id.to_string(),
                bucket_name: bucket_name.to_string(),
                key: key.to_string(),
                size,
                content_type: content_type.map(|s| s.to_string()),
            }));

        Ok(())
    }

    /// Refleter une suppression d'objet dans l'index
    pub fn notify_object_deleted(
        &self,
        profile_id: &str,
        bucket_name: &str,
        key: &str,
    ) -> Result<(), AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.remove_object(bucket_name, key)?;
        Ok(())
    }

    /// Refleter une suppression de dossier dans l'index
    ///
    /// Retourne le nombre d'objets retires de l'index.
    pub fn notify_folder_deleted(
        &self,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<i64, AppError> {
        validation::validate_prefix(prefix)?;
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.remove_folder(bucket_name, prefix)
    }

    /// Refleter une copie d'objet dans l'index (intra ou inter-bucket)
    pub fn notify_object_copied(
        &self,
        profile_id: &str,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<(), AppError> {
        let index_mgr = self.index_manager(profile_id)?;
        index_mgr.copy_object(source_bucket, source_key, dest_bucket, dest_key)
    }

    // ========================================================================
    // Cache Control Operations
    // ========================================================================

    /// Statut des deux caches de poignees (monitoring/debug)
    pub fn get_cache_status(&self) -> AllCachesStatus {
        AllCachesStatus {
            database_managers: self.db_managers.status(),
            index_managers: self.index_managers.status(),
        }
    }

    /// Prechauffer les poignees d'un profil
    ///
    /// Cree DatabaseManager et IndexManager en avance (ouverture du pool
    /// SQLite comprise), pour absorber la latence avant le premier acces.
    pub fn warmup_profile_cache(&self, profile_id: &str) -> Result<(), AppError> {
        let _ = self.index_manager(profile_id)?;
        Ok(())
    }

    // cleanup_profile_cache et clear_all_caches vivent dans core.rs:
    // elles drainent les jobs avant d'evincer les poignees.

    // ========================================================================
    // Metrics Operations
    // ========================================================================

    /// Enregistrer un evenement de cache fourni par l'hote
    pub fn record_cache_event_op(&self, event: &CacheEvent) -> Result<(), AppError> {
        self.metrics().record_cache_event(event)
    }

    /// Statistiques du jour
    pub fn get_metrics_today(&self, pricing: Option<S3Pricing>) -> Result<DailyStats, AppError> {
        let pricing = pricing.unwrap_or_else(|| self.config.pricing.clone());
        self.metrics().get_today_stats(&pricing)
    }

    /// Historique des N derniers jours
    pub fn get_metrics_history(
        &self,
        days: u32,
        pricing: Option<S3Pricing>,
    ) -> Result<Vec<DailyStats>, AppError> {
        let pricing = pricing.unwrap_or_else(|| self.config.pricing.clone());
        self.metrics().get_stats_history(days, &pricing)
    }

    /// Histogramme horaire agrege sur N jours
    pub fn get_metrics_hourly(&self, days: u32) -> Result<Vec<HourlyStats>, AppError> {
        self.metrics().get_hourly_stats(days)
    }

    /// Repartition par operation sur N jours
    pub fn get_metrics_by_operation(&self, days: u32) -> Result<Vec<OperationStats>, AppError> {
        self.metrics().get_operation_stats(days)
    }

    /// Repartition des erreurs par categorie sur N jours
    pub fn get_metrics_errors(&self, days: u32) -> Result<Vec<ErrorStats>, AppError> {
        self.metrics().get_error_stats(days)
    }

    /// Buckets les plus sollicites sur N jours
    pub fn get_metrics_top_buckets(
        &self,
        days: u32,
        limit: u32,
    ) -> Result<Vec<BucketUsageStats>, AppError> {
        self.metrics().get_top_buckets(days, limit)
    }

    /// Dernieres requetes enregistrees
    pub fn get_metrics_recent(&self, limit: u32) -> Result<Vec<RequestRecord>, AppError> {
        self.metrics().get_recent_requests(limit)
    }

    /// Requetes en echec sur N jours
    pub fn get_metrics_failed(
        &self,
        days: u32,
        limit: u32,
    ) -> Result<Vec<RequestRecord>, AppError> {
        self.metrics().get_failed_requests(days, limit)
    }

    /// Resume du cache (requetes economisees, taux, cout evite)
    pub fn get_cache_summary(
        &self,
        days: u32,
        pricing: Option<S3Pricing>,
    ) -> Result<CacheSummary, AppError> {
        let pricing = pricing.unwrap_or_else(|| self.config.pricing.clone());
        self.metrics().get_cache_summary(days, &pricing)
    }

    /// Statistiques de cache du jour
    pub fn get_today_cache_stats(
        &self,
        pricing: Option<S3Pricing>,
    ) -> Result<DailyCacheStats, AppError> {
        let pricing = pricing.unwrap_or_else(|| self.config.pricing.clone());
        self.metrics().get_today_cache_stats(&pricing)
    }

    /// Volumetrie du magasin de metriques
    pub fn get_metrics_storage_info(&self) -> Result<StorageInfo, AppError> {
        self.metrics().get_storage_info()
    }

    /// Purger les metriques au-dela de la retention
    pub fn purge_metrics(&self, retention_days: u32) -> Result<u64, AppError> {
        let requests = self.metrics().purge_old_data(retention_days)?;
        let _ = self.metrics().purge_cache_events(retention_days)?;
        Ok(requests)
    }

    /// Vider toutes les metriques
    pub fn clear_metrics(&self) -> Result<(), AppError> {
        self.metrics().clear_all()
    }
}
