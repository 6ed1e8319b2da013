//! Module de gestion de la base de donnees SQLite
//!
//! Gere les connexions, migrations et operations CRUD sur l'index.
//! Une base de donnees par profil est creee dans le repertoire de donnees
//! passe par le Core. Toutes les ecritures en masse sont transactionnelles;
//! SQLite serialise les ecritures, les lectures restent concurrentes (WAL).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::AppError;
use crate::models::{BucketIndexMetadata, BucketInfo, IndexedObject, PrefixStatus, S3Object};

/// Type alias pour le pool de connexions SQLite
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Version actuelle du schema de base de donnees
const SCHEMA_VERSION: i32 = 1;

/// Gestionnaire de base de donnees pour un profil
pub struct DatabaseManager {
    pool: Arc<DbPool>,
    profile_id: String,
}

impl DatabaseManager {
    /// Creer ou ouvrir une base de donnees pour un profil
    ///
    /// Au premier acces le fichier passe un PRAGMA integrity_check; un
    /// fichier corrompu est mis en quarantaine (renomme) et remplace.
    pub fn new(data_dir: &Path, profile_id: &str) -> Result<Self, AppError> {
        let db_path = Self::get_db_path(data_dir, profile_id)?;

        // Creer le repertoire parent si necessaire
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::quarantine_if_corrupt(&db_path)?;

        // Creer le gestionnaire de connexions
        let manager = SqliteConnectionManager::file(&db_path);

        // Pool reduit: le cache de ressources borne deja le nombre de profils
        // ouverts, 4 connexions par profil suffisent (1 writer + lecteurs)
        let pool = Pool::builder()
            .max_size(4)
            .min_idle(Some(1))
            .idle_timeout(Some(Duration::from_secs(120)))
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;

        let db_manager = Self {
            pool: Arc::new(pool),
            profile_id: profile_id.to_string(),
        };

        // Initialiser le schema
        db_manager.initialize_schema()?;

        Ok(db_manager)
    }

    /// Obtenir le chemin de la base de donnees pour un profil
    pub fn get_db_path(data_dir: &Path, profile_id: &str) -> Result<PathBuf, AppError> {
        // Sanitize profile_id pour eviter les injections de chemin
        let safe_id = profile_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect::<String>();

        if safe_id.is_empty() {
            return Err(AppError::ValidationError("Invalid profile ID".to_string()));
        }

        Ok(data_dir.join("indexes").join(format!("{}.db", safe_id)))
    }

    /// Obtenir la taille du fichier de base de donnees sur le disque (en bytes)
    /// Retourne 0 si le fichier n'existe pas
    pub fn get_db_file_size(data_dir: &Path, profile_id: &str) -> Result<u64, AppError> {
        let db_path = Self::get_db_path(data_dir, profile_id)?;

        if !db_path.exists() {
            return Ok(0);
        }

        let main_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

        // Ajouter les fichiers WAL et SHM s'ils sont presents
        let wal_path = db_path.with_extension("db-wal");
        let wal_size = if wal_path.exists() {
            std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let shm_path = db_path.with_extension("db-shm");
        let shm_size = if shm_path.exists() {
            std::fs::metadata(&shm_path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        Ok(main_size + wal_size + shm_size)
    }

    /// Mettre en quarantaine un fichier de base corrompu
    ///
    /// Detecte via PRAGMA integrity_check a l'ouverture; le fichier (et ses
    /// compagnons WAL/SHM) est renomme avec un suffixe .corrupt-<epoch-ms>
    /// et une base neuve sera creee a sa place.
    fn quarantine_if_corrupt(db_path: &Path) -> Result<(), AppError> {
        if !db_path.exists() {
            return Ok(());
        }

        let check: Result<String, _> = Connection::open(db_path).and_then(|conn| {
            conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))
        });

        match check {
            Ok(result) if result == "ok" => Ok(()),
            other => {
                let reason = match other {
                    Ok(result) => result,
                    Err(e) => e.to_string(),
                };
                let stamp = chrono::Utc::now().timestamp_millis();
                log::warn!(
                    "Integrity check failed for {:?} ({}), quarantining file",
                    db_path,
                    reason
                );

                for suffix in ["", "-wal", "-shm"] {
                    let src = if suffix.is_empty() {
                        db_path.to_path_buf()
                    } else {
                        PathBuf::from(format!("{}{}", db_path.display(), suffix))
                    };
                    if src.exists() {
                        let dest = PathBuf::from(format!(
                            "{}.corrupt-{}{}",
                            db_path.display(),
                            stamp,
                            suffix
                        ));
                        std::fs::rename(&src, &dest).map_err(|e| {
                            AppError::CorruptDatabase(format!(
                                "{} (quarantine rename failed: {})",
                                reason, e
                            ))
                        })?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Obtenir une connexion du pool
    pub fn get_connection(&self) -> Result<DbConnection, AppError> {
        self.pool
            .get()
            .map_err(|e| AppError::PoolError(e.to_string()))
    }

    /// Initialiser le schema de la base de donnees
    fn initialize_schema(&self) -> Result<(), AppError> {
        let conn = self.get_connection()?;

        // Activer les optimisations SQLite
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;

        // Verifier la version du schema
        let current_version = self.get_schema_version(&conn)?;

        if current_version == 0 {
            // Nouvelle base de donnees - creer le schema complet
            self.create_schema(&conn)?;
        } else if current_version < SCHEMA_VERSION {
            // Migration necessaire
            self.migrate_schema(&conn, current_version)?;
        }

        Ok(())
    }

    /// Obtenir la version actuelle du schema
    fn get_schema_version(&self, conn: &Connection) -> Result<i32, AppError> {
        let result: Result<i32, _> =
            conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            });

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(rusqlite::Error::SqliteFailure(_, _)) => Ok(0), // Table n'existe pas
            Err(e) => Err(AppError::DatabaseError(e.to_string())),
        }
    }

    /// Creer le schema initial
    fn create_schema(&self, conn: &Connection) -> Result<(), AppError> {
        conn.execute_batch(include_str!("sql/schema_v1.sql"))?;

        conn.execute(
            "INSERT INTO schema_version (version, updated_at)
             SELECT ?1, ?2 WHERE NOT EXISTS (SELECT 1 FROM schema_version)",
            params![SCHEMA_VERSION, chrono::Utc::now().timestamp_millis()],
        )?;

        Ok(())
    }

    /// Migrer le schema vers une version plus recente (forward-only)
    fn migrate_schema(&self, conn: &Connection, from_version: i32) -> Result<(), AppError> {
        // Migrations futures seront ajoutees ici
        if from_version < 1 {
            self.create_schema(conn)?;
        }

        conn.execute(
            "UPDATE schema_version SET version = ?, updated_at = ?",
            params![SCHEMA_VERSION, chrono::Utc::now().timestamp_millis()],
        )?;

        Ok(())
    }

    // ========================================================================
    // CRUD Operations - Objects
    // ========================================================================

    /// Inserer ou mettre a jour un objet dans l'index
    ///
    /// Garantit aussi l'existence des lignes prefix_status pour le
    /// parent_prefix et tous ses ancetres (invariant de hierarchie).
    pub fn upsert_object(&self, obj: &IndexedObject) -> Result<i64, AppError> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        Self::ensure_prefix_chain_exists(&tx, &self.profile_id, &obj.bucket_name, &obj.parent_prefix)?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO objects (
                profile_id, bucket_name, key, parent_prefix, basename,
                size, last_modified, storage_class, e_tag, is_folder,
                indexed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                obj.profile_id,
                obj.bucket_name,
                obj.key,
                obj.parent_prefix,
                obj.basename,
                obj.size,
                obj.last_modified,
                obj.storage_class,
                obj.e_tag,
                obj.is_folder,
                obj.indexed_at,
            ],
        )?;

        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Inserer ou mettre a jour plusieurs objets en une seule transaction
    pub fn upsert_objects_batch(&self, objects: &[IndexedObject]) -> Result<usize, AppError> {
        if objects.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        // Creer les lignes prefix_status manquantes pour chaque parent distinct
        {
            let mut seen: Vec<&str> = Vec::new();
            for obj in objects {
                if !seen.contains(&obj.parent_prefix.as_str()) {
                    seen.push(&obj.parent_prefix);
                    Self::ensure_prefix_chain_exists(
                        &tx,
                        &self.profile_id,
                        &obj.bucket_name,
                        &obj.parent_prefix,
                    )?;
                }
            }
        }

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO objects (
                    profile_id, bucket_name, key, parent_prefix, basename,
                    size, last_modified, storage_class, e_tag, is_folder,
                    indexed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;

            for obj in objects {
                stmt.execute(params![
                    obj.profile_id,
                    obj.bucket_name,
                    obj.key,
                    obj.parent_prefix,
                    obj.basename,
                    obj.size,
                    obj.last_modified,
                    obj.storage_class,
                    obj.e_tag,
                    obj.is_folder,
                    obj.indexed_at,
                ])?;
                count += 1;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// Supprimer un objet de l'index
    pub fn delete_object(&self, bucket_name: &str, key: &str) -> Result<bool, AppError> {
        let conn = self.get_connection()?;

        let deleted = conn.execute(
            "DELETE FROM objects WHERE profile_id = ?1 AND bucket_name = ?2 AND key = ?3",
            params![self.profile_id, bucket_name, key],
        )?;

        Ok(deleted > 0)
    }

    /// Supprimer tous les objets d'un prefixe (recursif)
    pub fn delete_objects_by_prefix(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<i64, AppError> {
        let conn = self.get_connection()?;

        let deleted = conn.execute(
            "DELETE FROM objects WHERE profile_id = ?1 AND bucket_name = ?2 AND key LIKE ?3",
            params![self.profile_id, bucket_name, format!("{}%", prefix)],
        )?;

        Ok(deleted as i64)
    }

    /// Synchroniser les objets d'un prefix entre l'index et la liste live
    ///
    /// Supprime de l'index les objets qui ne sont plus dans la liste S3.
    /// Cela permet de nettoyer les "objets fantomes" supprimes sur S3 par
    /// un autre client. Seul chemin de suppression pilote par un listing.
    ///
    /// Note: ne supprime que les objets au niveau exact du prefix
    /// (parent_prefix = prefix), pas les objets dans les sous-dossiers.
    pub fn sync_prefix_objects(
        &self,
        bucket_name: &str,
        prefix: &str,
        current_keys: &[String],
    ) -> Result<i64, AppError> {
        if current_keys.is_empty() {
            // Si pas d'objets dans S3, supprimer tous les objets de ce prefix
            let conn = self.get_connection()?;
            let deleted = conn.execute(
                r#"
                DELETE FROM objects
                WHERE profile_id = ?1
                  AND bucket_name = ?2
                  AND parent_prefix = ?3
                "#,
                params![self.profile_id, bucket_name, prefix],
            )?;
            return Ok(deleted as i64);
        }

        let conn = self.get_connection()?;
        let tx = conn.unchecked_transaction()?;

        // Creer une table temporaire avec les cles actuelles
        tx.execute(
            "CREATE TEMP TABLE IF NOT EXISTS sync_current_keys (key TEXT PRIMARY KEY)",
            [],
        )?;
        tx.execute("DELETE FROM sync_current_keys", [])?;

        // Inserer les cles actuelles par batch (multi-value INSERT,
        // SQLite limite a 999 parametres donc batches de 500)
        const BATCH_SIZE: usize = 500;

        for chunk in current_keys.chunks(BATCH_SIZE) {
            if chunk.is_empty() {
                continue;
            }

            let placeholders: String = (1..=chunk.len())
                .map(|i| format!("(?{})", i))
                .collect::<Vec<_>>()
                .join(",");

            let sql = format!(
                "INSERT OR IGNORE INTO sync_current_keys (key) VALUES {}",
                placeholders
            );

            tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
        }

        // Supprimer les objets qui sont dans l'index mais pas dans current_keys
        let deleted = tx.execute(
            r#"
            DELETE FROM objects
            WHERE profile_id = ?1
              AND bucket_name = ?2
              AND parent_prefix = ?3
              AND key NOT IN (SELECT key FROM sync_current_keys)
            "#,
            params![self.profile_id, bucket_name, prefix],
        )?;

        tx.execute("DROP TABLE IF EXISTS sync_current_keys", [])?;
        tx.commit()?;

        Ok(deleted as i64)
    }

    /// Recuperer un objet par sa cle
    pub fn get_object(
        &self,
        bucket_name: &str,
        key: &str,
    ) -> Result<Option<IndexedObject>, AppError> {
        let conn = self.get_connection()?;

        let result = conn
            .query_row(
                r#"
            SELECT
                id, profile_id, bucket_name, key, parent_prefix, basename,
                size, last_modified, storage_class, e_tag, is_folder,
                indexed_at
            FROM objects
            WHERE profile_id = ?1 AND bucket_name = ?2 AND key = ?3
            "#,
                params![self.profile_id, bucket_name, key],
                |row| Self::row_to_indexed_object(row),
            )
            .optional()?;

        Ok(result)
    }

    /// Convertir une ligne SQLite en IndexedObject
    fn row_to_indexed_object(row: &rusqlite::Row) -> rusqlite::Result<IndexedObject> {
        Ok(IndexedObject {
            id: row.get(0)?,
            profile_id: row.get(1)?,
            bucket_name: row.get(2)?,
            key: row.get(3)?,
            parent_prefix: row.get(4)?,
            basename: row.get(5)?,
            size: row.get(6)?,
            last_modified: row.get(7)?,
            storage_class: row.get(8)?,
            e_tag: row.get(9)?,
            is_folder: row.get(10)?,
            indexed_at: row.get(11)?,
        })
    }

    // ========================================================================
    // CRUD Operations - Prefix Status
    // ========================================================================

    /// Mettre a jour ou creer le statut d'un prefixe (et creer les parents s'ils n'existent pas)
    pub fn upsert_prefix_status(&self, status: &PrefixStatus) -> Result<(), AppError> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        // D'abord, creer les entrees pour tous les prefixes parents s'ils n'existent pas
        Self::ensure_parent_prefixes_exist(&tx, &self.profile_id, &status.bucket_name, &status.prefix)?;

        // Ensuite, upsert le prefix actuel
        tx.execute(
            r#"
            INSERT INTO prefix_status (
                profile_id, bucket_name, prefix,
                is_complete, objects_count, total_size,
                continuation_token, last_indexed_key,
                last_sync_started_at, last_sync_completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(profile_id, bucket_name, prefix)
            DO UPDATE SET
                is_complete = excluded.is_complete,
                objects_count = excluded.objects_count,
                total_size = excluded.total_size,
                continuation_token = excluded.continuation_token,
                last_indexed_key = excluded.last_indexed_key,
                last_sync_started_at = excluded.last_sync_started_at,
                last_sync_completed_at = excluded.last_sync_completed_at
            "#,
            params![
                status.profile_id,
                status.bucket_name,
                status.prefix,
                status.is_complete,
                status.objects_count,
                status.total_size,
                status.continuation_token,
                status.last_indexed_key,
                status.last_sync_started_at,
                status.last_sync_completed_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Creer les entrees prefix_status pour tous les prefixes parents (s'ils n'existent pas)
    fn ensure_parent_prefixes_exist(
        tx: &rusqlite::Transaction,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<(), AppError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut current = prefix.to_string();

        // Remonter la hierarchie des prefixes
        while let Some(pos) = current.trim_end_matches('/').rfind('/') {
            current = format!("{}/", &current[..pos]);

            // Inserer le parent s'il n'existe pas (avec is_complete = false)
            tx.execute(
                r#"
                INSERT OR IGNORE INTO prefix_status (
                    profile_id, bucket_name, prefix,
                    is_complete, objects_count, total_size,
                    last_sync_started_at
                ) VALUES (?1, ?2, ?3, FALSE, 0, 0, ?4)
                "#,
                params![profile_id, bucket_name, current, now],
            )?;
        }

        // S'assurer que le prefix racine existe aussi
        tx.execute(
            r#"
            INSERT OR IGNORE INTO prefix_status (
                profile_id, bucket_name, prefix,
                is_complete, objects_count, total_size,
                last_sync_started_at
            ) VALUES (?1, ?2, '', FALSE, 0, 0, ?3)
            "#,
            params![profile_id, bucket_name, now],
        )?;

        Ok(())
    }

    /// Creer les entrees prefix_status pour un prefixe ET ses parents
    ///
    /// Variante de ensure_parent_prefixes_exist qui inclut le prefixe
    /// lui-meme; utilisee par les chemins d'upsert d'objets pour que tout
    /// objet indexe ait une chaine de prefixes connue jusqu'a la racine.
    fn ensure_prefix_chain_exists(
        tx: &rusqlite::Transaction,
        profile_id: &str,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<(), AppError> {
        if !prefix.is_empty() {
            let now = chrono::Utc::now().timestamp_millis();
            tx.execute(
                r#"
                INSERT OR IGNORE INTO prefix_status (
                    profile_id, bucket_name, prefix,
                    is_complete, objects_count, total_size,
                    last_sync_started_at
                ) VALUES (?1, ?2, ?3, FALSE, 0, 0, ?4)
                "#,
                params![profile_id, bucket_name, prefix, now],
            )?;
        }

        Self::ensure_parent_prefixes_exist(tx, profile_id, bucket_name, prefix)
    }

    /// Recuperer le statut d'un prefixe
    pub fn get_prefix_status(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<Option<PrefixStatus>, AppError> {
        let conn = self.get_connection()?;

        let result = conn
            .query_row(
                r#"
            SELECT
                id, profile_id, bucket_name, prefix,
                is_complete, objects_count, total_size,
                continuation_token, last_indexed_key,
                last_sync_started_at, last_sync_completed_at
            FROM prefix_status
            WHERE profile_id = ?1 AND bucket_name = ?2 AND prefix = ?3
            "#,
                params![self.profile_id, bucket_name, prefix],
                |row| {
                    Ok(PrefixStatus {
                        id: row.get(0)?,
                        profile_id: row.get(1)?,
                        bucket_name: row.get(2)?,
                        prefix: row.get(3)?,
                        is_complete: row.get(4)?,
                        objects_count: row.get(5)?,
                        total_size: row.get(6)?,
                        continuation_token: row.get(7)?,
                        last_indexed_key: row.get(8)?,
                        last_sync_started_at: row.get(9)?,
                        last_sync_completed_at: row.get(10)?,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    /// Marquer un prefixe comme incomplet (apres modification)
    pub fn mark_prefix_incomplete(&self, bucket_name: &str, prefix: &str) -> Result<(), AppError> {
        let conn = self.get_connection()?;

        conn.execute(
            r#"
            UPDATE prefix_status
            SET is_complete = FALSE
            WHERE profile_id = ?1 AND bucket_name = ?2 AND prefix = ?3
            "#,
            params![self.profile_id, bucket_name, prefix],
        )?;

        Ok(())
    }

    /// Marquer un prefixe ET tous ses ancetres comme incomplets
    ///
    /// Pour "a/b/c/d/", marque ["a/b/c/d/", "a/b/c/", "a/b/", "a/", ""]
    /// en une seule requete UPDATE avec clause IN.
    pub fn mark_prefix_and_ancestors_incomplete(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<(), AppError> {
        let conn = self.get_connection()?;

        // Collecter tous les prefixes ancetres
        let mut prefixes_to_mark: Vec<String> = vec![prefix.to_string()];
        let mut current = prefix.to_string();

        while let Some(pos) = current.trim_end_matches('/').rfind('/') {
            current = format!("{}/", &current[..pos]);
            prefixes_to_mark.push(current.clone());
        }

        // Ajouter le prefix racine (chaine vide)
        if !prefix.is_empty() {
            prefixes_to_mark.push(String::new());
        }

        let placeholders: String = (0..prefixes_to_mark.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            r#"
            UPDATE prefix_status
            SET is_complete = FALSE
            WHERE profile_id = ?1 AND bucket_name = ?2 AND prefix IN ({})
            "#,
            placeholders
        );

        let mut params_vec: Vec<&dyn rusqlite::ToSql> =
            Vec::with_capacity(2 + prefixes_to_mark.len());
        params_vec.push(&self.profile_id);
        params_vec.push(&bucket_name);
        for pfx in &prefixes_to_mark {
            params_vec.push(pfx);
        }

        conn.execute(&sql, params_vec.as_slice())?;

        Ok(())
    }

    /// Marquer tous les prefixes d'un bucket comme complets
    ///
    /// Utilise apres un scan plat integral: par definition, chaque prefixe
    /// connu a alors tous ses enfants dans l'index.
    pub fn mark_all_prefixes_complete(&self, bucket_name: &str) -> Result<(), AppError> {
        let conn = self.get_connection()?;

        conn.execute(
            r#"
            UPDATE prefix_status
            SET is_complete = TRUE
            WHERE profile_id = ?1 AND bucket_name = ?2
            "#,
            params![self.profile_id, bucket_name],
        )?;

        Ok(())
    }

    /// Supprimer le statut d'un prefixe
    pub fn delete_prefix_status(&self, bucket_name: &str, prefix: &str) -> Result<(), AppError> {
        let conn = self.get_connection()?;

        conn.execute(
            "DELETE FROM prefix_status WHERE profile_id = ?1 AND bucket_name = ?2 AND prefix = ?3",
            params![self.profile_id, bucket_name, prefix],
        )?;

        Ok(())
    }

    /// Nettoyer les entrees prefix_status orphelines
    ///
    /// Supprime les entrees prefix_status qui n'ont plus d'objets
    /// correspondants dans la table objects (dossiers supprimes sur S3 par
    /// un autre client). Operation de maintenance explicite, jamais
    /// declenchee implicitement par la reconciliation.
    ///
    /// Note: ne supprime pas le prefix racine (prefix = '').
    pub fn cleanup_orphan_prefix_status(&self, bucket_name: &str) -> Result<i64, AppError> {
        let conn = self.get_connection()?;

        let deleted = conn.execute(
            r#"
            DELETE FROM prefix_status
            WHERE profile_id = ?1
              AND bucket_name = ?2
              AND prefix != ''
              AND NOT EXISTS (
                  SELECT 1 FROM objects o
                  WHERE o.profile_id = prefix_status.profile_id
                    AND o.bucket_name = prefix_status.bucket_name
                    AND o.key LIKE prefix_status.prefix || '%'
              )
            "#,
            params![self.profile_id, bucket_name],
        )?;

        Ok(deleted as i64)
    }

    // ========================================================================
    // Statistics Queries
    // ========================================================================

    /// Calculer les statistiques recursives d'un prefixe depuis l'index
    pub fn calculate_prefix_stats(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<(i64, i64), AppError> {
        let conn = self.get_connection()?;

        let (count, size): (i64, i64) = conn.query_row(
            r#"
            SELECT
                COUNT(*) as count,
                COALESCE(SUM(size), 0) as total_size
            FROM objects
            WHERE profile_id = ?1
              AND bucket_name = ?2
              AND key LIKE ?3
              AND is_folder = FALSE
            "#,
            params![self.profile_id, bucket_name, format!("{}%", prefix)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok((count, size))
    }

    /// Calculer les statistiques directes de TOUS les prefixes en une requete
    ///
    /// Retourne, par parent_prefix, le nombre et la taille des enfants
    /// directs (hors dossiers). Une seule passe GROUP BY au lieu d'une
    /// requete par prefixe.
    pub fn calculate_all_prefix_stats_batch(
        &self,
        bucket_name: &str,
    ) -> Result<HashMap<String, (i64, i64)>, AppError> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT
                parent_prefix,
                COUNT(*) as count,
                COALESCE(SUM(size), 0) as total_size
            FROM objects
            WHERE profile_id = ?1
              AND bucket_name = ?2
              AND parent_prefix != ''
              AND is_folder = FALSE
            GROUP BY parent_prefix
            "#,
        )?;

        let stats = stmt
            .query_map(params![self.profile_id, bucket_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    (row.get::<_, i64>(1)?, row.get::<_, i64>(2)?),
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(stats)
    }

    /// Inserer/mettre a jour plusieurs PrefixStatus en une seule transaction
    pub fn batch_upsert_prefix_status(&self, statuses: &[PrefixStatus]) -> Result<(), AppError> {
        if statuses.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO prefix_status (
                    profile_id, bucket_name, prefix,
                    is_complete, objects_count, total_size,
                    continuation_token, last_indexed_key,
                    last_sync_started_at, last_sync_completed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT (profile_id, bucket_name, prefix) DO UPDATE SET
                    is_complete = excluded.is_complete,
                    objects_count = excluded.objects_count,
                    total_size = excluded.total_size,
                    continuation_token = excluded.continuation_token,
                    last_indexed_key = excluded.last_indexed_key,
                    last_sync_started_at = excluded.last_sync_started_at,
                    last_sync_completed_at = excluded.last_sync_completed_at
                "#,
            )?;

            for status in statuses {
                stmt.execute(params![
                    status.profile_id,
                    status.bucket_name,
                    status.prefix,
                    status.is_complete,
                    status.objects_count,
                    status.total_size,
                    status.continuation_token,
                    status.last_indexed_key,
                    status.last_sync_started_at,
                    status.last_sync_completed_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Calculer les statistiques du bucket entier
    pub fn calculate_bucket_stats(&self, bucket_name: &str) -> Result<(i64, i64), AppError> {
        let conn = self.get_connection()?;

        let (count, size): (i64, i64) = conn.query_row(
            r#"
            SELECT
                COUNT(*) as count,
                COALESCE(SUM(size), 0) as total_size
            FROM objects
            WHERE profile_id = ?1 AND bucket_name = ?2 AND is_folder = FALSE
            "#,
            params![self.profile_id, bucket_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok((count, size))
    }

    /// Calculer la taille estimee de l'index pour un bucket specifique
    ///
    /// Formule: ~200 bytes de surcout par ligne (structure + B-tree) plus
    /// la longueur effective des champs texte.
    pub fn calculate_bucket_index_size(&self, bucket_name: &str) -> Result<i64, AppError> {
        let conn = self.get_connection()?;

        let size: i64 = conn
            .query_row(
                r#"
                SELECT COALESCE(
                    COUNT(*) * 200 +
                    SUM(LENGTH(key)) +
                    SUM(LENGTH(COALESCE(e_tag, ''))) +
                    SUM(LENGTH(COALESCE(storage_class, ''))) +
                    SUM(LENGTH(COALESCE(parent_prefix, ''))) +
                    SUM(LENGTH(COALESCE(basename, '')))
                , 0)
                FROM objects
                WHERE profile_id = ?1 AND bucket_name = ?2
                "#,
                params![self.profile_id, bucket_name],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(size)
    }

    /// Obtenir les statistiques par classe de stockage
    pub fn get_storage_class_stats(
        &self,
        bucket_name: &str,
    ) -> Result<Vec<(String, i64, i64)>, AppError> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT
                storage_class,
                COUNT(*) as count,
                SUM(size) as total_size
            FROM objects
            WHERE profile_id = ?1 AND bucket_name = ?2 AND is_folder = FALSE
            GROUP BY storage_class
            ORDER BY total_size DESC
            "#,
        )?;

        let rows = stmt.query_map(params![self.profile_id, bucket_name], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    /// Verifier si un prefixe est marque complet (sans verifier les enfants)
    /// Utilise pour l'affichage rapide
    pub fn is_prefix_self_complete(
        &self,
        bucket_name: &str,
        prefix: &str,
    ) -> Result<bool, AppError> {
        let conn = self.get_connection()?;

        let result: bool = conn
            .query_row(
                r#"
            SELECT COALESCE(is_complete, FALSE)
            FROM prefix_status
            WHERE profile_id = ?1 AND bucket_name = ?2 AND prefix = ?3
            "#,
                params![self.profile_id, bucket_name, prefix],
                |row| row.get(0),
            )
            .unwrap_or(false);

        Ok(result)
    }

    /// Verifier si un prefixe est recursivement complet
    ///
    /// Vrai ssi la ligne existe avec is_complete = true ET aucune ligne
    /// descendante (prefix LIKE 'p%', prefix != p) n'est incomplete.
    /// Une mutation optimiste sous p rend donc p incomplet immediatement.
    pub fn is_prefix_complete(&self, bucket_name: &str, prefix: &str) -> Result<bool, AppError> {
        let conn = self.get_connection()?;

        // 1. La ligne du prefixe lui-meme doit exister et etre complete
        let self_status: Option<bool> = conn
            .query_row(
                r#"
                SELECT is_complete
                FROM prefix_status
                WHERE profile_id = ?1 AND bucket_name = ?2 AND prefix = ?3
                "#,
                params![self.profile_id, bucket_name, prefix],
                |row| row.get(0),
            )
            .optional()?;

        match self_status {
            None => return Ok(false), // Jamais explore = incomplet
            Some(false) => return Ok(false),
            Some(true) => {}
        }

        // 2. Aucun descendant connu ne doit etre incomplet
        let prefix_pattern = format!("{}%", prefix);

        let has_incomplete_children: bool = conn
            .query_row(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM prefix_status
                    WHERE profile_id = ?1
                      AND bucket_name = ?2
                      AND prefix LIKE ?3
                      AND prefix != ?4
                      AND is_complete = FALSE
                )
                "#,
                params![self.profile_id, bucket_name, prefix_pattern, prefix],
                |row| row.get(0),
            )
            .unwrap_or(true); // En cas d'erreur, considerer incomplet

        Ok(!has_incomplete_children)
    }

    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Rechercher des objets par sous-chaine dans la cle (case-insensitive)
    /// Si limit est None, retourne tous les resultats
    pub fn search_objects(
        &self,
        bucket_name: &str,
        query: &str,
        prefix: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<S3Object>, AppError> {
        let conn = self.get_connection()?;

        let search_pattern = format!("%{}%", query.to_lowercase());

        let limit_clause = match limit {
            Some(l) => format!("LIMIT {}", l),
            None => String::new(),
        };

        let sql = if prefix.is_some() {
            format!(
                r#"
                SELECT key, size, last_modified, storage_class, e_tag, is_folder
                FROM objects
                WHERE profile_id = ?1
                  AND bucket_name = ?2
                  AND LOWER(key) LIKE ?3
                  AND key LIKE ?4
                ORDER BY key
                {}
                "#,
                limit_clause
            )
        } else {
            format!(
                r#"
                SELECT key, size, last_modified, storage_class, e_tag, is_folder
                FROM objects
                WHERE profile_id = ?1
                  AND bucket_name = ?2
                  AND LOWER(key) LIKE ?3
                ORDER BY key
                {}
                "#,
                limit_clause
            )
        };

        let mut stmt = conn.prepare(&sql)?;

        let row_to_object = |row: &rusqlite::Row| -> rusqlite::Result<S3Object> {
            Ok(S3Object {
                key: row.get(0)?,
                size: row.get(1)?,
                last_modified: row.get(2)?,
                storage_class: row.get(3)?,
                e_tag: row.get(4)?,
                is_folder: row.get(5)?,
            })
        };

        let results: Vec<S3Object> = if let Some(pfx) = prefix {
            let prefix_pattern = format!("{}%", pfx);
            stmt.query_map(
                params![self.profile_id, bucket_name, search_pattern, prefix_pattern],
                row_to_object,
            )?
            .filter_map(Result::ok)
            .collect()
        } else {
            stmt.query_map(
                params![self.profile_id, bucket_name, search_pattern],
                row_to_object,
            )?
            .filter_map(Result::ok)
            .collect()
        };

        Ok(results)
    }

    /// Obtenir tous les buckets indexes avec leurs metadonnees
    ///
    /// Une seule passe d'agregation sur objects (GROUP BY) jointe a
    /// bucket_info, au lieu de sous-requetes correlees par bucket.
    pub fn get_all_bucket_indexes(&self) -> Result<Vec<BucketIndexMetadata>, AppError> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT
                bi.bucket_name,
                COALESCE(stats.total_objects, 0) as total_objects,
                COALESCE(stats.total_size, 0) as total_size,
                bi.initial_index_completed as is_complete,
                bi.last_full_scan_at as last_indexed_at,
                COALESCE(stats.estimated_index_size, 0) as estimated_index_size
            FROM bucket_info bi
            LEFT JOIN (
                SELECT
                    bucket_name,
                    SUM(CASE WHEN is_folder = 0 THEN 1 ELSE 0 END) as total_objects,
                    SUM(CASE WHEN is_folder = 0 THEN size ELSE 0 END) as total_size,
                    COUNT(*) * 200 +
                    SUM(LENGTH(key)) +
                    SUM(LENGTH(COALESCE(e_tag, ''))) +
                    SUM(LENGTH(COALESCE(storage_class, ''))) +
                    SUM(LENGTH(COALESCE(parent_prefix, ''))) +
                    SUM(LENGTH(COALESCE(basename, ''))) as estimated_index_size
                FROM objects
                WHERE profile_id = ?1
                GROUP BY bucket_name
            ) stats ON stats.bucket_name = bi.bucket_name
            WHERE bi.profile_id = ?1
            ORDER BY bi.bucket_name
            "#,
        )?;

        let results: Vec<BucketIndexMetadata> = stmt
            .query_map(params![self.profile_id], |row| {
                Ok(BucketIndexMetadata {
                    bucket_name: row.get(0)?,
                    total_objects: row.get(1)?,
                    total_size: row.get(2)?,
                    is_complete: row.get(3)?,
                    last_indexed_at: row.get(4)?,
                    estimated_index_size: row.get(5)?,
                })
            })?
            .filter_map(Result::ok)
            .collect();

        Ok(results)
    }

    // ========================================================================
    // Bucket Info
    // ========================================================================

    /// Mettre a jour les informations d'un bucket
    pub fn upsert_bucket_info(&self, info: &BucketInfo) -> Result<(), AppError> {
        let conn = self.get_connection()?;

        conn.execute(
            r#"
            INSERT INTO bucket_info (
                profile_id, bucket_name,
                initial_index_requests, initial_index_completed,
                last_full_scan_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(profile_id, bucket_name)
            DO UPDATE SET
                initial_index_requests = excluded.initial_index_requests,
                initial_index_completed = excluded.initial_index_completed,
                last_full_scan_at = COALESCE(excluded.last_full_scan_at, last_full_scan_at)
            "#,
            params![
                info.profile_id,
                info.bucket_name,
                info.initial_index_requests,
                info.initial_index_completed,
                info.last_full_scan_at,
            ],
        )?;

        Ok(())
    }

    /// Recuperer les informations d'un bucket
    pub fn get_bucket_info(&self, bucket_name: &str) -> Result<Option<BucketInfo>, AppError> {
        let conn = self.get_connection()?;

        let result = conn
            .query_row(
                r#"
            SELECT
                id, profile_id, bucket_name,
                initial_index_requests, initial_index_completed,
                last_full_scan_at
            FROM bucket_info
            WHERE profile_id = ?1 AND bucket_name = ?2
            "#,
                params![self.profile_id, bucket_name],
                |row| {
                    Ok(BucketInfo {
                        id: row.get(0)?,
                        profile_id: row.get(1)?,
                        bucket_name: row.get(2)?,
                        initial_index_requests: row.get(3)?,
                        initial_index_completed: row.get(4)?,
                        last_full_scan_at: row.get(5)?,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Purger les objets obsoletes (plus vieux que stale_hours)
    pub fn purge_stale_objects(
        &self,
        bucket_name: &str,
        stale_hours: u32,
    ) -> Result<i64, AppError> {
        let conn = self.get_connection()?;

        let cutoff = chrono::Utc::now().timestamp_millis() - (stale_hours as i64 * 60 * 60 * 1000);

        let deleted = conn.execute(
            r#"
            DELETE FROM objects
            WHERE profile_id = ?1
              AND bucket_name = ?2
              AND indexed_at < ?3
            "#,
            params![self.profile_id, bucket_name, cutoff],
        )?;

        Ok(deleted as i64)
    }

    /// Vider tout l'index d'un bucket
    pub fn clear_bucket_index(&self, bucket_name: &str) -> Result<(), AppError> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM objects WHERE profile_id = ?1 AND bucket_name = ?2",
            params![self.profile_id, bucket_name],
        )?;

        tx.execute(
            "DELETE FROM prefix_status WHERE profile_id = ?1 AND bucket_name = ?2",
            params![self.profile_id, bucket_name],
        )?;

        tx.execute(
            "DELETE FROM bucket_info WHERE profile_id = ?1 AND bucket_name = ?2",
            params![self.profile_id, bucket_name],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Optimiser la base de donnees (VACUUM)
    pub fn optimize(&self) -> Result<(), AppError> {
        let conn = self.get_connection()?;
        conn.execute_batch("VACUUM; ANALYZE;")?;
        Ok(())
    }

    /// Obtenir le profile_id
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> (tempfile::TempDir, DatabaseManager) {
        let dir = tempfile::tempdir().unwrap();
        let test_id = format!("test-{}", uuid::Uuid::new_v4());
        let db = DatabaseManager::new(dir.path(), &test_id).unwrap();
        (dir, db)
    }

    fn test_object(db: &DatabaseManager, bucket: &str, key: &str, size: i64) -> IndexedObject {
        IndexedObject {
            id: None,
            profile_id: db.profile_id().to_string(),
            bucket_name: bucket.to_string(),
            key: key.to_string(),
            parent_prefix: IndexedObject::extract_parent_prefix(key),
            basename: IndexedObject::extract_basename(key),
            size,
            last_modified: Some(1_700_000_000_000),
            storage_class: "STANDARD".to_string(),
            e_tag: Some("abc123".to_string()),
            is_folder: key.ends_with('/'),
            indexed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[test]
    fn test_db_creation() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::new(dir.path(), "test-creation");
        assert!(db.is_ok());
    }

    #[test]
    fn test_invalid_profile_id() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DatabaseManager::new(dir.path(), "///").is_err());
    }

    #[test]
    fn test_upsert_and_get_object() {
        let (_dir, db) = create_test_db();

        let obj = test_object(&db, "test-bucket", "folder/file.txt", 1024);
        db.upsert_object(&obj).unwrap();

        let retrieved = db.get_object("test-bucket", "folder/file.txt").unwrap();
        assert!(retrieved.is_some());

        let retrieved = retrieved.unwrap();
        assert_eq!(retrieved.size, 1024);
        assert_eq!(retrieved.basename, "file.txt");
        assert_eq!(retrieved.parent_prefix, "folder/");
    }

    #[test]
    fn test_upsert_creates_prefix_chain() {
        let (_dir, db) = create_test_db();

        let obj = test_object(&db, "bkt", "a/b/c/file.txt", 10);
        db.upsert_object(&obj).unwrap();

        // Toute la chaine de prefixes doit exister, marquee incomplete
        for prefix in ["a/b/c/", "a/b/", "a/", ""] {
            let status = db.get_prefix_status("bkt", prefix).unwrap();
            assert!(status.is_some(), "missing prefix_status for {:?}", prefix);
            assert!(!status.unwrap().is_complete);
        }
    }

    #[test]
    fn test_calculate_prefix_stats() {
        let (_dir, db) = create_test_db();

        for i in 0..5 {
            let obj = test_object(&db, "test-bucket", &format!("data/file{}.txt", i), 100);
            db.upsert_object(&obj).unwrap();
        }

        let (count, size) = db.calculate_prefix_stats("test-bucket", "data/").unwrap();
        assert_eq!(count, 5);
        assert_eq!(size, 500);
    }

    #[test]
    fn test_batch_upsert() {
        let (_dir, db) = create_test_db();

        let objects: Vec<IndexedObject> = (0..100)
            .map(|i| test_object(&db, "test-bucket", &format!("batch/file{}.txt", i), 50))
            .collect();

        let count = db.upsert_objects_batch(&objects).unwrap();
        assert_eq!(count, 100);

        let (obj_count, total_size) = db.calculate_prefix_stats("test-bucket", "batch/").unwrap();
        assert_eq!(obj_count, 100);
        assert_eq!(total_size, 5000);
    }

    #[test]
    fn test_prefix_status_roundtrip_and_ancestors() {
        let (_dir, db) = create_test_db();

        let status = PrefixStatus {
            id: None,
            profile_id: db.profile_id().to_string(),
            bucket_name: "test-bucket".to_string(),
            prefix: "data/2024/".to_string(),
            is_complete: true,
            objects_count: 100,
            total_size: 50000,
            continuation_token: None,
            last_indexed_key: Some("data/2024/file99.txt".to_string()),
            last_sync_started_at: Some(chrono::Utc::now().timestamp_millis()),
            last_sync_completed_at: Some(chrono::Utc::now().timestamp_millis()),
        };

        db.upsert_prefix_status(&status).unwrap();

        let retrieved = db.get_prefix_status("test-bucket", "data/2024/").unwrap();
        assert!(retrieved.is_some());

        let retrieved = retrieved.unwrap();
        assert!(retrieved.is_complete);
        assert_eq!(retrieved.objects_count, 100);

        // Les ancetres ont ete auto-crees, incomplets
        let parent = db.get_prefix_status("test-bucket", "data/").unwrap().unwrap();
        assert!(!parent.is_complete);
        let root = db.get_prefix_status("test-bucket", "").unwrap().unwrap();
        assert!(!root.is_complete);
    }

    #[test]
    fn test_mark_prefix_and_ancestors_incomplete() {
        let (_dir, db) = create_test_db();

        // Creer une hierarchie complete
        for prefix in ["a/b/c/", "a/b/", "a/", ""] {
            let status = PrefixStatus {
                profile_id: db.profile_id().to_string(),
                bucket_name: "bkt".to_string(),
                prefix: prefix.to_string(),
                is_complete: true,
                ..Default::default()
            };
            db.upsert_prefix_status(&status).unwrap();
            // upsert_prefix_status recrée les parents incomplets; re-marquer
            db.get_connection()
                .unwrap()
                .execute(
                    "UPDATE prefix_status SET is_complete = TRUE WHERE bucket_name = 'bkt'",
                    [],
                )
                .unwrap();
        }

        db.mark_prefix_and_ancestors_incomplete("bkt", "a/b/c/").unwrap();

        for prefix in ["a/b/c/", "a/b/", "a/", ""] {
            assert!(!db.is_prefix_self_complete("bkt", prefix).unwrap());
        }
    }

    #[test]
    fn test_sync_prefix_objects_removes_ghosts() {
        let (_dir, db) = create_test_db();

        for key in ["a", "b", "c"] {
            db.upsert_object(&test_object(&db, "bkt", key, 10)).unwrap();
        }

        // La liste live ne contient plus que a et c
        let current = vec!["a".to_string(), "c".to_string()];
        let deleted = db.sync_prefix_objects("bkt", "", &current).unwrap();
        assert_eq!(deleted, 1);

        assert!(db.get_object("bkt", "a").unwrap().is_some());
        assert!(db.get_object("bkt", "b").unwrap().is_none());
        assert!(db.get_object("bkt", "c").unwrap().is_some());
    }

    #[test]
    fn test_sync_prefix_objects_exact_level_only() {
        let (_dir, db) = create_test_db();

        db.upsert_object(&test_object(&db, "bkt", "dir/x.txt", 10)).unwrap();
        db.upsert_object(&test_object(&db, "bkt", "dir/sub/y.txt", 10)).unwrap();

        // Page vide au niveau "dir/": seuls les enfants directs sont balayes
        let deleted = db.sync_prefix_objects("bkt", "dir/", &[]).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_object("bkt", "dir/sub/y.txt").unwrap().is_some());
    }

    #[test]
    fn test_is_prefix_complete_recursive() {
        let (_dir, db) = create_test_db();

        // Racine complete mais descendant incomplet
        db.upsert_prefix_status(&PrefixStatus {
            profile_id: db.profile_id().to_string(),
            bucket_name: "bkt".to_string(),
            prefix: "docs/".to_string(),
            is_complete: false,
            ..Default::default()
        })
        .unwrap();
        db.upsert_prefix_status(&PrefixStatus {
            profile_id: db.profile_id().to_string(),
            bucket_name: "bkt".to_string(),
            prefix: "".to_string(),
            is_complete: true,
            ..Default::default()
        })
        .unwrap();

        assert!(db.is_prefix_self_complete("bkt", "").unwrap());
        assert!(!db.is_prefix_complete("bkt", "").unwrap());

        // Une fois le descendant complete, la racine devient recursivement complete
        db.upsert_prefix_status(&PrefixStatus {
            profile_id: db.profile_id().to_string(),
            bucket_name: "bkt".to_string(),
            prefix: "docs/".to_string(),
            is_complete: true,
            ..Default::default()
        })
        .unwrap();
        assert!(db.is_prefix_complete("bkt", "").unwrap());

        // Prefixe inconnu = incomplet
        assert!(!db.is_prefix_complete("bkt", "unknown/").unwrap());
    }

    #[test]
    fn test_search_objects() {
        let (_dir, db) = create_test_db();

        db.upsert_object(&test_object(&db, "bkt", "docs/Report_Q1.pdf", 100)).unwrap();
        db.upsert_object(&test_object(&db, "bkt", "images/report.png", 200)).unwrap();

        let all = db.search_objects("bkt", "repo", None, Some(10)).unwrap();
        assert_eq!(all.len(), 2);

        let docs_only = db.search_objects("bkt", "repo", Some("docs/"), Some(10)).unwrap();
        assert_eq!(docs_only.len(), 1);
        assert_eq!(docs_only[0].key, "docs/Report_Q1.pdf");
    }

    #[test]
    fn test_folder_marker_and_file_coexist() {
        let (_dir, db) = create_test_db();

        // Marqueur de dossier "data/" et objet "data" distincts
        db.upsert_object(&test_object(&db, "bkt", "data/", 0)).unwrap();
        db.upsert_object(&test_object(&db, "bkt", "data", 42)).unwrap();

        assert!(db.get_object("bkt", "data/").unwrap().unwrap().is_folder);
        assert_eq!(db.get_object("bkt", "data").unwrap().unwrap().size, 42);

        // Les stats ignorent le marqueur de dossier
        let (count, size) = db.calculate_prefix_stats("bkt", "").unwrap();
        assert_eq!(count, 1);
        assert_eq!(size, 42);
    }

    #[test]
    fn test_cleanup_orphan_prefix_status() {
        let (_dir, db) = create_test_db();

        db.upsert_object(&test_object(&db, "bkt", "keep/file.txt", 10)).unwrap();
        db.upsert_prefix_status(&PrefixStatus {
            profile_id: db.profile_id().to_string(),
            bucket_name: "bkt".to_string(),
            prefix: "gone/".to_string(),
            is_complete: false,
            ..Default::default()
        })
        .unwrap();

        let deleted = db.cleanup_orphan_prefix_status("bkt").unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_prefix_status("bkt", "gone/").unwrap().is_none());
        assert!(db.get_prefix_status("bkt", "keep/").unwrap().is_some());
        // La racine est preservee
        assert!(db.get_prefix_status("bkt", "").unwrap().is_some());
    }

    #[test]
    fn test_bucket_info_roundtrip() {
        let (_dir, db) = create_test_db();

        let info = BucketInfo {
            id: None,
            profile_id: db.profile_id().to_string(),
            bucket_name: "bkt".to_string(),
            initial_index_requests: 7,
            initial_index_completed: true,
            last_full_scan_at: Some(1_700_000_000_000),
        };
        db.upsert_bucket_info(&info).unwrap();

        let read = db.get_bucket_info("bkt").unwrap().unwrap();
        assert_eq!(read.initial_index_requests, 7);
        assert!(read.initial_index_completed);
        assert_eq!(read.last_full_scan_at, Some(1_700_000_000_000));
    }

    #[test]
    fn test_clear_bucket_index() {
        let (_dir, db) = create_test_db();

        db.upsert_object(&test_object(&db, "bkt", "f/file.txt", 10)).unwrap();
        db.upsert_bucket_info(&BucketInfo {
            profile_id: db.profile_id().to_string(),
            bucket_name: "bkt".to_string(),
            ..Default::default()
        })
        .unwrap();

        db.clear_bucket_index("bkt").unwrap();

        assert!(db.get_object("bkt", "f/file.txt").unwrap().is_none());
        assert!(db.get_prefix_status("bkt", "f/").unwrap().is_none());
        assert!(db.get_bucket_info("bkt").unwrap().is_none());
    }

    #[test]
    fn test_quarantine_corrupt_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = DatabaseManager::get_db_path(dir.path(), "corrupt-test").unwrap();
        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
        std::fs::write(&db_path, b"this is not a sqlite file at all").unwrap();

        // L'ouverture met le fichier en quarantaine et repart sur une base neuve
        let db = DatabaseManager::new(dir.path(), "corrupt-test").unwrap();
        assert!(db.get_object("bkt", "any").unwrap().is_none());

        let quarantined = std::fs::read_dir(db_path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }
}
