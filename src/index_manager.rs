//! Gestionnaire d'indexation S3
//!
//! Point de passage unique pour toute mutation de l'index: reconciliation
//! des listings, mises a jour optimistes apres create/delete/copy, scan
//! initial borne avec annulation et reprise, statistiques et recherche.
//!
//! Les invariants maintenus ici:
//! - tout objet indexe a une chaine de prefix_status jusqu'a la racine;
//! - un prefixe marque complet a tous ses enfants directs dans l'index;
//! - toute mutation sous un prefixe invalide sa completude et celle de
//!   ses ancetres.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::database::DatabaseManager;
use crate::errors::AppError;
use crate::listing::ObjectLister;
use crate::models::{
    BucketIndexMetadata, BucketIndexStats, BucketInfo, IndexedObject, IndexingConfig,
    InitialIndexResult, ListObjectsResponse, PrefixStats, PrefixStatus, S3Object,
    StorageClassStats,
};
use crate::validation;

/// Gestionnaire d'indexation pour un profil
pub struct IndexManager {
    pub db: Arc<DatabaseManager>,
    profile_id: String,
}

impl IndexManager {
    /// Creer un gestionnaire d'indexation au-dessus d'une base de profil
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        let profile_id = db.profile_id().to_string();
        Self { db, profile_id }
    }

    // ========================================================================
    // Indexation Initiale
    // ========================================================================

    /// Effectuer l'indexation initiale d'un bucket
    ///
    /// Fait jusqu'a `config.max_initial_requests` requetes sans delimiter
    /// pour charger le maximum d'objets. Si un token de reprise a ete
    /// persiste par un scan precedent (interrompu ou hors budget), le scan
    /// reprend a ce token au lieu de repartir de zero.
    ///
    /// Le callback `on_progress` est appele apres chaque page avec
    /// (objects_indexed, requests_made, max_requests).
    ///
    /// Si `cancel_rx` est fourni, l'annulation est verifiee en tete de
    /// boucle: l'etat atteint (token compris) est toujours persiste avant
    /// de rendre la main, et le resultat porte `cancelled = true`.
    pub async fn initial_index_bucket<F>(
        &self,
        lister: &dyn ObjectLister,
        bucket_name: &str,
        config: &IndexingConfig,
        mut on_progress: F,
        mut cancel_rx: Option<broadcast::Receiver<()>>,
    ) -> Result<InitialIndexResult, AppError>
    where
        F: FnMut(u64, u32, u32),
    {
        let config = config.clamped();
        let now = chrono::Utc::now().timestamp_millis();

        // Marquer le debut de l'indexation
        let mut bucket_info = self.db.get_bucket_info(bucket_name)?.unwrap_or(BucketInfo {
            id: None,
            profile_id: self.profile_id.clone(),
            bucket_name: bucket_name.to_string(),
            initial_index_requests: 0,
            initial_index_completed: false,
            last_full_scan_at: None,
        });

        // Statut racine: point de reprise si un scan partiel a eu lieu
        let existing_root = self.db.get_prefix_status(bucket_name, "")?;
        let mut continuation_token: Option<String> = None;
        if !bucket_info.initial_index_completed {
            if let Some(ref status) = existing_root {
                continuation_token = status.continuation_token.clone();
            }
        }

        let mut root_status = existing_root.unwrap_or(PrefixStatus {
            profile_id: self.profile_id.clone(),
            bucket_name: bucket_name.to_string(),
            prefix: String::new(),
            ..Default::default()
        });
        root_status.last_sync_started_at = Some(now);
        self.db.upsert_prefix_status(&root_status)?;
        self.db.upsert_bucket_info(&bucket_info)?;

        let mut total_indexed: u64 = 0;
        let mut requests_made: u32 = 0;
        let mut last_key: Option<String> = root_status.last_indexed_key.clone();
        let mut is_complete = false;
        let mut was_cancelled = false;
        let mut failure: Option<AppError> = None;

        // Boucle d'indexation: pages strictement sequentielles
        loop {
            // Verifier si l'annulation a ete demandee
            if let Some(ref mut rx) = cancel_rx {
                if rx.try_recv().is_ok() {
                    was_cancelled = true;
                    break;
                }
            }

            if requests_made >= config.max_initial_requests {
                break;
            }

            // Requete sans delimiter pour lister le bucket a plat
            let response = match lister
                .list_objects(
                    bucket_name,
                    None, // Pas de prefix - tout le bucket
                    continuation_token.clone(),
                    Some(config.batch_size),
                    false, // PAS de delimiter
                )
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    // L'etat atteint sera persiste avant de propager
                    failure = Some(e);
                    break;
                }
            };

            requests_made += 1;

            let indexed_objects: Vec<IndexedObject> = response
                .objects
                .iter()
                .map(|obj| IndexedObject::from_s3_object(obj, &self.profile_id, bucket_name))
                .collect();

            if !indexed_objects.is_empty() {
                last_key = indexed_objects.last().map(|o| o.key.clone());
                let count = self.db.upsert_objects_batch(&indexed_objects)?;
                total_indexed += count as u64;
            }

            // Emettre la progression apres chaque page persistee
            on_progress(total_indexed, requests_made, config.max_initial_requests);

            if !response.is_truncated {
                is_complete = true;
                continuation_token = None;
                break;
            }

            continuation_token = response.continuation_token;

            // Tronque sans token de continuation: on ne peut pas avancer
            if continuation_token.is_none() {
                break;
            }
        }

        if failure.is_none() && is_complete {
            // Bucket completement indexe: sceller tous les prefixes connus
            // comme complets, avec leurs agregats recursifs.
            self.seal_complete_index(bucket_name)?;
        } else if failure.is_none() && !was_cancelled {
            // Bucket trop grand pour le budget: une requete avec delimiter
            // a la racine decouvre les dossiers de premier niveau, pour que
            // la navigation reste possible malgre l'index partiel.
            // Jamais apres une annulation.
            match lister
                .list_objects(bucket_name, Some(""), None, Some(config.batch_size), true)
                .await
            {
                Ok(root_response) => {
                    requests_made += 1;
                    for folder_prefix in &root_response.common_prefixes {
                        if self
                            .db
                            .get_prefix_status(bucket_name, folder_prefix)?
                            .is_none()
                        {
                            let folder_status = PrefixStatus {
                                profile_id: self.profile_id.clone(),
                                bucket_name: bucket_name.to_string(),
                                prefix: folder_prefix.clone(),
                                is_complete: false,
                                ..Default::default()
                            };
                            self.db.upsert_prefix_status(&folder_status)?;
                        }
                    }
                }
                Err(e) => {
                    failure = Some(e);
                }
            }
        }

        // Persister l'etat atteint dans tous les cas (annulation et echec
        // compris): c'est ce qui rend le scan reprenable sans perte.
        let completed_at = chrono::Utc::now().timestamp_millis();
        let (bucket_count, bucket_size) = self.db.calculate_bucket_stats(bucket_name)?;

        root_status.is_complete = is_complete;
        root_status.objects_count = bucket_count;
        root_status.total_size = bucket_size;
        root_status.continuation_token = continuation_token.clone();
        root_status.last_indexed_key = last_key.clone();
        if is_complete {
            root_status.last_sync_completed_at = Some(completed_at);
        }
        self.db.upsert_prefix_status(&root_status)?;

        bucket_info.initial_index_requests += requests_made as i32;
        bucket_info.initial_index_completed = is_complete;
        if is_complete {
            bucket_info.last_full_scan_at = Some(completed_at);
        }
        self.db.upsert_bucket_info(&bucket_info)?;

        if let Some(e) = failure {
            log::warn!(
                "Initial indexing of bucket '{}' failed after {} requests: {}",
                bucket_name,
                requests_made,
                e
            );
            return Err(e);
        }

        Ok(InitialIndexResult {
            total_indexed,
            is_complete,
            requests_made,
            continuation_token,
            last_key,
            total_size: bucket_size,
            cancelled: was_cancelled,
            error: if was_cancelled {
                Some("Indexing cancelled before completion".to_string())
            } else {
                None
            },
        })
    }

    /// Sceller l'index apres un scan plat integral
    ///
    /// Une seule passe GROUP BY donne les stats directes par parent_prefix;
    /// les agregats recursifs et les prefixes intermediaires (ceux sans
    /// enfant direct) sont derives en memoire, puis tout est ecrit en une
    /// transaction. Les lignes deja connues passent aussi a complet.
    fn seal_complete_index(&self, bucket_name: &str) -> Result<(), AppError> {
        let direct = self.db.calculate_all_prefix_stats_batch(bucket_name)?;
        let now = chrono::Utc::now().timestamp_millis();

        // Ensemble de tous les prefixes: chaque parent_prefix et ses ancetres
        let mut all_prefixes: BTreeSet<String> = BTreeSet::new();
        for prefix in direct.keys() {
            let mut current = prefix.clone();
            loop {
                all_prefixes.insert(current.clone());
                match current.trim_end_matches('/').rfind('/') {
                    Some(pos) => current = format!("{}/", &current[..pos]),
                    None => break,
                }
            }
        }

        let statuses: Vec<PrefixStatus> = all_prefixes
            .into_iter()
            .map(|prefix| {
                let mut objects_count = 0i64;
                let mut total_size = 0i64;
                for (p, (count, size)) in &direct {
                    if p.starts_with(&prefix) {
                        objects_count += count;
                        total_size += size;
                    }
                }
                PrefixStatus {
                    id: None,
                    profile_id: self.profile_id.clone(),
                    bucket_name: bucket_name.to_string(),
                    prefix,
                    is_complete: true,
                    objects_count,
                    total_size,
                    continuation_token: None,
                    last_indexed_key: None,
                    last_sync_started_at: Some(now),
                    last_sync_completed_at: Some(now),
                }
            })
            .collect();

        self.db.batch_upsert_prefix_status(&statuses)?;

        // Les lignes restantes (dossiers vides decouverts auparavant) sont
        // elles aussi completes apres un scan integral
        self.db.mark_all_prefixes_complete(bucket_name)?;

        Ok(())
    }

    // ========================================================================
    // Reconciliation des Listings
    // ========================================================================

    /// Mettre a jour l'index avec une reponse ListObjects
    ///
    /// Appele apres chaque page de listing pour garder l'index synchronise.
    /// Indexe les objets ET les dossiers (common_prefixes) decouverts; une
    /// ligne prefix_status existante n'est jamais ecrasee par la decouverte
    /// (sa completude est une connaissance acquise).
    pub fn update_from_list_response(
        &self,
        bucket_name: &str,
        prefix: &str,
        response: &ListObjectsResponse,
    ) -> Result<usize, AppError> {
        let indexed_objects: Vec<IndexedObject> = response
            .objects
            .iter()
            .map(|obj| IndexedObject::from_s3_object(obj, &self.profile_id, bucket_name))
            .collect();

        let count = self.db.upsert_objects_batch(&indexed_objects)?;

        // Creer des entrees prefix_status pour les dossiers decouverts,
        // seulement s'ils sont inconnus (is_complete = false, stats a zero)
        for folder_prefix in &response.common_prefixes {
            if self
                .db
                .get_prefix_status(bucket_name, folder_prefix)?
                .is_none()
            {
                let folder_status = PrefixStatus {
                    profile_id: self.profile_id.clone(),
                    bucket_name: bucket_name.to_string(),
                    prefix: folder_prefix.clone(),
                    is_complete: false,
                    ..Default::default()
                };
                self.db.upsert_prefix_status(&folder_status)?;
            }
        }

        // Mettre a jour le statut du prefixe courant
        let now = chrono::Utc::now().timestamp_millis();
        let (obj_count, total_size) = self.db.calculate_prefix_stats(bucket_name, prefix)?;

        if let Some(mut status) = self.db.get_prefix_status(bucket_name, prefix)? {
            status.continuation_token = response.continuation_token.clone();

            // Si la liste n'est pas tronquee, le prefixe est complet
            if !response.is_truncated {
                status.is_complete = true;
                status.last_sync_completed_at = Some(now);
            }

            if let Some(last) = indexed_objects.last() {
                status.last_indexed_key = Some(last.key.clone());
            }
            status.objects_count = obj_count;
            status.total_size = total_size;

            self.db.upsert_prefix_status(&status)?;
        } else {
            let status = PrefixStatus {
                id: None,
                profile_id: self.profile_id.clone(),
                bucket_name: bucket_name.to_string(),
                prefix: prefix.to_string(),
                is_complete: !response.is_truncated,
                objects_count: obj_count,
                total_size,
                continuation_token: response.continuation_token.clone(),
                last_indexed_key: indexed_objects.last().map(|o| o.key.clone()),
                last_sync_started_at: Some(now),
                last_sync_completed_at: if !response.is_truncated {
                    Some(now)
                } else {
                    None
                },
            };
            self.db.upsert_prefix_status(&status)?;
        }

        Ok(count)
    }

    /// Reconcilier la premiere page d'un rafraichissement explicite
    ///
    /// En plus de `update_from_list_response`, supprime de l'index les
    /// objets du niveau exact qui ne figurent plus dans la page (objets
    /// fantomes supprimes sur S3 par un autre client). A n'appeler que sur
    /// la premiere page d'un listing demande par l'utilisateur: sur une
    /// page de pagination tardive, le balayage supprimerait les objets des
    /// pages precedentes.
    pub fn sync_listing_page(
        &self,
        bucket_name: &str,
        prefix: &str,
        response: &ListObjectsResponse,
    ) -> Result<usize, AppError> {
        let current_keys: Vec<String> = response.objects.iter().map(|o| o.key.clone()).collect();

        let deleted = self
            .db
            .sync_prefix_objects(bucket_name, prefix, &current_keys)?;

        if deleted > 0 {
            log::debug!(
                "Ghost sweep removed {} objects under '{}/{}'",
                deleted,
                bucket_name,
                prefix
            );
            // La suppression invalide la completude du prefixe et de ses
            // ancetres; la page live retablit ensuite celle du prefixe
            self.db
                .mark_prefix_and_ancestors_incomplete(bucket_name, prefix)?;
        }

        self.update_from_list_response(bucket_name, prefix, response)
    }

    // ========================================================================
    // Mises a Jour Optimistes
    // ========================================================================

    /// Ajouter un objet a l'index (apres put_object reussi)
    ///
    /// Le nouvel objet peut habiter un prefixe que l'index croyait complet:
    /// le prefixe parent ET tous ses ancetres repassent incomplets.
    pub fn add_object(&self, bucket_name: &str, obj: &S3Object) -> Result<(), AppError> {
        validation::validate_object_key(&obj.key)?;

        let indexed = IndexedObject::from_s3_object(obj, &self.profile_id, bucket_name);
        self.db.upsert_object(&indexed)?;

        let parent = &indexed.parent_prefix;
        if !parent.is_empty() {
            self.db
                .mark_prefix_and_ancestors_incomplete(bucket_name, parent)?;
        } else {
            // Objet a la racine - marquer le bucket comme incomplet
            self.db.mark_prefix_incomplete(bucket_name, "")?;
        }

        Ok(())
    }

    /// Supprimer un objet de l'index (apres delete_object reussi)
    ///
    /// Meme si l'objet n'est pas dans l'index (bucket partiellement
    /// indexe), les ancetres repassent incomplets: le remote a change,
    /// notre croyance de completude ne tient plus.
    pub fn remove_object(&self, bucket_name: &str, key: &str) -> Result<bool, AppError> {
        let parent_prefix = IndexedObject::extract_parent_prefix(key);

        let was_deleted = self.db.delete_object(bucket_name, key)?;

        if !parent_prefix.is_empty() {
            self.db
                .mark_prefix_and_ancestors_incomplete(bucket_name, &parent_prefix)?;
        } else {
            self.db.mark_prefix_incomplete(bucket_name, "")?;
        }

        Ok(was_deleted)
    }

    /// Supprimer un dossier de l'index (apres delete_folder reussi)
    pub fn remove_folder(&self, bucket_name: &str, prefix: &str) -> Result<i64, AppError> {
        let deleted = self.db.delete_objects_by_prefix(bucket_name, prefix)?;

        // Supprimer aussi le prefix_status du dossier supprime
        self.db.delete_prefix_status(bucket_name, prefix)?;

        let parent = IndexedObject::extract_parent_prefix(prefix);
        self.db
            .mark_prefix_and_ancestors_incomplete(bucket_name, &parent)?;

        Ok(deleted)
    }

    /// Refleter une copie d'objet dans l'index (apres copy_object reussi)
    ///
    /// Reutilise les metadonnees de la source si elle est indexee; sinon
    /// taille 0 et classe STANDARD (la prochaine reconciliation corrigera).
    pub fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<(), AppError> {
        validation::validate_object_key(dest_key)?;

        let source = self.db.get_object(source_bucket, source_key)?;
        let (size, storage_class, last_modified) = match source {
            Some(src) => (src.size, src.storage_class, src.last_modified),
            None => (0, "STANDARD".to_string(), None),
        };

        let obj = S3Object {
            key: dest_key.to_string(),
            size,
            last_modified,
            storage_class: Some(storage_class),
            e_tag: None, // L'e_tag de la copie est inconnu localement
            is_folder: dest_key.ends_with('/'),
        };
        let indexed = IndexedObject::from_s3_object(&obj, &self.profile_id, dest_bucket);
        self.db.upsert_object(&indexed)?;

        let parent = &indexed.parent_prefix;
        if !parent.is_empty() {
            self.db
                .mark_prefix_and_ancestors_incomplete(dest_bucket, parent)?;
        } else {
            self.db.mark_prefix_incomplete(dest_bucket, "")?;
        }

        Ok(())
    }

    /// Synchroniser les objets d'un prefix avec la liste actuelle de S3
    ///
    /// Variante bas-niveau de sync_listing_page pour un appelant qui a
    /// deja extrait les cles. Marque les ancetres incomplets si des objets
    /// fantomes ont ete supprimes.
    pub fn sync_prefix_objects(
        &self,
        bucket_name: &str,
        prefix: &str,
        current_keys: &[String],
    ) -> Result<i64, AppError> {
        let deleted = self
            .db
            .sync_prefix_objects(bucket_name, prefix, current_keys)?;

        if deleted > 0 {
            self.db
                .mark_prefix_and_ancestors_incomplete(bucket_name, prefix)?;
        }

        Ok(deleted)
    }

    // ========================================================================
    // Calcul de Statistiques
    // ========================================================================

    /// Obtenir les statistiques d'un bucket depuis l'index
    pub fn get_bucket_stats(&self, bucket_name: &str) -> Result<BucketIndexStats, AppError> {
        let (total_objects, total_size) = self.db.calculate_bucket_stats(bucket_name)?;

        // Completude recursive: une mutation optimiste quelconque suffit
        // a faire retomber le bucket a incomplet
        let is_complete = self.db.is_prefix_complete(bucket_name, "")?;

        let storage_breakdown = self.db.get_storage_class_stats(bucket_name)?;
        let storage_class_breakdown: Vec<StorageClassStats> = storage_breakdown
            .into_iter()
            .map(|(class, count, size)| StorageClassStats {
                storage_class: class,
                object_count: count,
                total_size: size,
            })
            .collect();

        let last_indexed_at = self
            .db
            .get_prefix_status(bucket_name, "")?
            .and_then(|s| s.last_sync_completed_at);

        let estimated_index_size = self.db.calculate_bucket_index_size(bucket_name)?;

        Ok(BucketIndexStats {
            bucket_name: bucket_name.to_string(),
            total_objects,
            total_size,
            is_complete,
            storage_class_breakdown,
            last_indexed_at,
            estimated_index_size,
        })
    }

    /// Obtenir les statistiques d'un prefixe (dossier)
    pub fn get_prefix_stats(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<PrefixStats, AppError> {
        let (objects_count, total_size) = self.db.calculate_prefix_stats(bucket_name, prefix)?;
        let is_complete = self.db.is_prefix_complete(bucket_name, prefix)?;

        let last_sync_at = self
            .db
            .get_prefix_status(bucket_name, prefix)?
            .and_then(|s| s.last_sync_completed_at);

        Ok(PrefixStats {
            prefix: prefix.to_string(),
            objects_count,
            total_size,
            is_complete,
            last_sync_at,
        })
    }

    /// Calculer la taille d'un dossier depuis l'index
    ///
    /// Retourne (taille, is_complete)
    pub fn calculate_folder_size(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<(i64, bool), AppError> {
        let (_, total_size) = self.db.calculate_prefix_stats(bucket_name, prefix)?;
        let is_complete = self.db.is_prefix_complete(bucket_name, prefix)?;

        Ok((total_size, is_complete))
    }

    // ========================================================================
    // Recherche
    // ========================================================================

    /// Rechercher des objets dans l'index
    pub fn search_objects(
        &self,
        bucket_name: &str,
        query: &str,
        prefix: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<S3Object>, AppError> {
        self.db.search_objects(bucket_name, query, prefix, limit)
    }

    /// Obtenir tous les index de buckets
    pub fn get_all_bucket_indexes(&self) -> Result<Vec<BucketIndexMetadata>, AppError> {
        self.db.get_all_bucket_indexes()
    }

    // ========================================================================
    // Utilitaires
    // ========================================================================

    /// Verifier si un bucket a deja ete indexe
    pub fn is_bucket_indexed(&self, bucket_name: &str) -> Result<bool, AppError> {
        Ok(self.db.get_bucket_info(bucket_name)?.is_some())
    }

    /// Verifier si l'index d'un bucket est recursivement complet
    pub fn is_bucket_complete(&self, bucket_name: &str) -> Result<bool, AppError> {
        self.db.is_prefix_complete(bucket_name, "")
    }

    /// Verifier si un prefixe est connu de l'index
    pub fn is_prefix_known(&self, bucket_name: &str, prefix: &str) -> Result<bool, AppError> {
        Ok(self.db.get_prefix_status(bucket_name, prefix)?.is_some())
    }

    /// Verifier si un prefixe est seulement decouvert
    ///
    /// Connu via common_prefixes mais jamais explore: incomplet et sans
    /// aucun objet indexe en dessous.
    pub fn is_prefix_discovered_only(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<bool, AppError> {
        match self.db.get_prefix_status(bucket_name, prefix)? {
            None => Ok(false),
            Some(status) => {
                if status.is_complete {
                    return Ok(false);
                }
                let (count, _) = self.db.calculate_prefix_stats(bucket_name, prefix)?;
                Ok(count == 0)
            }
        }
    }

    /// Vider l'index d'un bucket
    pub fn clear_bucket_index(&self, bucket_name: &str) -> Result<(), AppError> {
        self.db.clear_bucket_index(bucket_name)
    }

    /// Obtenir le statut d'un prefixe
    pub fn get_prefix_status(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<Option<PrefixStatus>, AppError> {
        self.db.get_prefix_status(bucket_name, prefix)
    }

    /// Purger les entrees d'index obsoletes d'un bucket
    pub fn purge_stale_objects(
        &self,
        bucket_name: &str,
        stale_hours: u32,
    ) -> Result<i64, AppError> {
        self.db.purge_stale_objects(bucket_name, stale_hours)
    }

    /// Nettoyer les prefix_status sans objets (maintenance explicite)
    pub fn cleanup_orphan_prefixes(&self, bucket_name: &str) -> Result<i64, AppError> {
        self.db.cleanup_orphan_prefix_status(bucket_name)
    }
}

// ============================================================================
// Tests
// ============================================================================
