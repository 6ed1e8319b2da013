use serde::{Deserialize, Serialize};

// ============================================================================
// Listing Types
// ============================================================================

/// S3 Object information as returned by a listing collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    pub key: String,
    pub size: i64,
    /// Last modification timestamp (epoch ms)
    pub last_modified: Option<i64>,
    pub storage_class: Option<String>,
    pub e_tag: Option<String>,
    pub is_folder: bool,
}

/// Response from listing objects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    pub objects: Vec<S3Object>,
    pub common_prefixes: Vec<String>, // Folders
    pub continuation_token: Option<String>,
    pub is_truncated: bool,
}

// ============================================================================
// Index Records
// ============================================================================

/// Objet indexe dans la base locale
///
/// Identite: (profile_id, bucket_name, key). Le parent_prefix est derive
/// de la cle et indexe pour les requetes de navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedObject {
    pub id: Option<i64>,
    pub profile_id: String,
    pub bucket_name: String,
    pub key: String,
    pub parent_prefix: String,
    pub basename: String,
    pub size: i64,
    pub last_modified: Option<i64>,
    pub storage_class: String,
    pub e_tag: Option<String>,
    pub is_folder: bool,
    pub indexed_at: i64,
}

impl IndexedObject {
    /// Construire un IndexedObject depuis un objet S3 liste
    pub fn from_s3_object(obj: &S3Object, profile_id: &str, bucket_name: &str) -> Self {
        let is_folder = obj.is_folder || obj.key.ends_with('/');
        Self {
            id: None,
            profile_id: profile_id.to_string(),
            bucket_name: bucket_name.to_string(),
            key: obj.key.clone(),
            parent_prefix: Self::extract_parent_prefix(&obj.key),
            basename: Self::extract_basename(&obj.key),
            size: obj.size,
            last_modified: obj.last_modified,
            storage_class: obj
                .storage_class
                .clone()
                .unwrap_or_else(|| "STANDARD".to_string()),
            e_tag: obj.e_tag.clone(),
            is_folder,
            indexed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Extraire le prefixe parent d'une cle
    ///
    /// "a/b/c.txt" -> "a/b/", "file.txt" -> "", "a/b/" -> "a/"
    /// (le slash final d'un marqueur de dossier ne compte pas)
    pub fn extract_parent_prefix(key: &str) -> String {
        let trimmed = key.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(pos) => trimmed[..=pos].to_string(),
            None => String::new(),
        }
    }

    /// Extraire le nom de base d'une cle ("a/b/c.txt" -> "c.txt", "a/b/" -> "b")
    pub fn extract_basename(key: &str) -> String {
        let trimmed = key.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(pos) => trimmed[pos + 1..].to_string(),
            None => trimmed.to_string(),
        }
    }

}

/// Statut d'indexation d'un prefixe
///
/// `is_complete` affirme que tous les enfants directs du prefixe sont
/// presents dans la table objects. Les agregats portent sur le sous-arbre
/// recursif et sont recalcules apres chaque mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefixStatus {
    pub id: Option<i64>,
    pub profile_id: String,
    pub bucket_name: String,
    pub prefix: String,
    pub is_complete: bool,
    pub objects_count: i64,
    pub total_size: i64,
    pub continuation_token: Option<String>,
    pub last_indexed_key: Option<String>,
    pub last_sync_started_at: Option<i64>,
    pub last_sync_completed_at: Option<i64>,
}

/// Informations d'indexation d'un bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: Option<i64>,
    pub profile_id: String,
    pub bucket_name: String,
    pub initial_index_requests: i32,
    pub initial_index_completed: bool,
    pub last_full_scan_at: Option<i64>,
}

// ============================================================================
// Indexing Configuration & Results
// ============================================================================

/// Configuration de l'indexation initiale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Nombre maximum de requetes ListObjectsV2 pour le scan initial (1..=100)
    pub max_initial_requests: u32,
    /// Taille des pages de listing (100..=1000)
    pub batch_size: i32,
    /// Age au-dela duquel une entree indexee est consideree obsolete
    pub stale_ttl_hours: u32,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_initial_requests: 20,
            batch_size: 1000,
            stale_ttl_hours: 24,
        }
    }
}

impl IndexingConfig {
    /// Ramener les valeurs dans les plages supportees
    pub fn clamped(&self) -> Self {
        Self {
            max_initial_requests: self.max_initial_requests.clamp(1, 100),
            batch_size: self.batch_size.clamp(100, 1000),
            stale_ttl_hours: self.stale_ttl_hours,
        }
    }
}

/// Resultat d'une indexation initiale
///
/// L'annulation n'est pas une erreur: `cancelled = true` avec le resultat
/// partiel et le token de reprise persiste.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialIndexResult {
    pub total_indexed: u64,
    pub is_complete: bool,
    pub requests_made: u32,
    pub continuation_token: Option<String>,
    pub last_key: Option<String>,
    pub total_size: i64,
    pub cancelled: bool,
    pub error: Option<String>,
}

// ============================================================================
// Statistics Payloads
// ============================================================================

/// Per-storage-class breakdown of a bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageClassStats {
    pub storage_class: String,
    pub object_count: i64,
    pub total_size: i64,
}

/// Bucket statistics computed from the local index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketIndexStats {
    pub bucket_name: String,
    pub total_objects: i64,
    pub total_size: i64,
    pub is_complete: bool,
    pub storage_class_breakdown: Vec<StorageClassStats>,
    pub last_indexed_at: Option<i64>,
    pub estimated_index_size: i64,
}

/// Prefix (folder) statistics computed from the local index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixStats {
    pub prefix: String,
    pub objects_count: i64,
    pub total_size: i64,
    pub is_complete: bool,
    pub last_sync_at: Option<i64>,
}

/// Per-bucket index inventory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketIndexMetadata {
    pub bucket_name: String,
    pub total_objects: i64,
    pub total_size: i64,
    pub is_complete: bool,
    pub last_indexed_at: Option<i64>,
    pub estimated_index_size: i64,
}

// ============================================================================
// Request Metrics Model
// ============================================================================

/// S3 operations tracked by the metrics store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum S3Operation {
    ListObjectsV2,
    GetObject,
    PutObject,
    DeleteObject,
    DeleteObjects,
    CopyObject,
    HeadObject,
    CreateFolder,
    DeleteFolder,
}

/// Billing category of a request
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCategory {
    GET,
    PUT,
    LIST,
    DELETE,
    /// Served locally from the index, no remote request
    LOCAL,
}

/// Coarse error buckets for dashboard grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum S3ErrorCategory {
    AccessDenied,
    NotFound,
    Network,
    Timeout,
    RateLimit,
    Validation,
    Unknown,
}

/// Categorize an S3 error message into a coarse bucket
pub fn categorize_s3_error(message: &str) -> S3ErrorCategory {
    let msg = message.to_lowercase();
    if msg.contains("access denied") || msg.contains("forbidden") || msg.contains("403") {
        S3ErrorCategory::AccessDenied
    } else if msg.contains("not found")
        || msg.contains("nosuchkey")
        || msg.contains("nosuchbucket")
        || msg.contains("404")
    {
        S3ErrorCategory::NotFound
    } else if msg.contains("timeout") || msg.contains("timed out") {
        S3ErrorCategory::Timeout
    } else if msg.contains("connection") || msg.contains("dns") || msg.contains("network") {
        S3ErrorCategory::Network
    } else if msg.contains("slowdown") || msg.contains("too many requests") || msg.contains("429")
    {
        S3ErrorCategory::RateLimit
    } else if msg.contains("validation") || msg.contains("invalid") {
        S3ErrorCategory::Validation
    } else {
        S3ErrorCategory::Unknown
    }
}

/// A single request metric event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3MetricsEvent {
    pub id: String,
    pub timestamp: i64,
    pub operation: S3Operation,
    pub category: RequestCategory,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub bucket_name: Option<String>,
    pub object_key: Option<String>,
    pub duration_ms: u64,
    pub bytes_transferred: Option<u64>,
    pub objects_affected: Option<u32>,
    pub success: bool,
    pub error_category: Option<S3ErrorCategory>,
    pub error_message: Option<String>,
}

impl S3MetricsEvent {
    pub fn new(operation: S3Operation, category: RequestCategory) -> Self {
        Self {
            id: format!(
                "req-{}-{}",
                chrono::Utc::now().timestamp_millis(),
                uuid::Uuid::new_v4()
            ),
            timestamp: chrono::Utc::now().timestamp_millis(),
            operation,
            category,
            profile_id: None,
            profile_name: None,
            bucket_name: None,
            object_key: None,
            duration_ms: 0,
            bytes_transferred: None,
            objects_affected: None,
            success: true,
            error_category: None,
            error_message: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_profile(mut self, profile_id: &str, profile_name: &str) -> Self {
        self.profile_id = Some(profile_id.to_string());
        self.profile_name = Some(profile_name.to_string());
        self
    }

    pub fn with_bucket(mut self, bucket_name: &str) -> Self {
        self.bucket_name = Some(bucket_name.to_string());
        self
    }

    pub fn with_object_key(mut self, key: &str) -> Self {
        self.object_key = Some(key.to_string());
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes_transferred = Some(bytes);
        self
    }

    pub fn with_objects_affected(mut self, count: u32) -> Self {
        self.objects_affected = Some(count);
        self
    }

    pub fn with_error(mut self, category: S3ErrorCategory, message: &str) -> Self {
        self.success = false;
        self.error_category = Some(category);
        self.error_message = Some(message.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_parent_prefix() {
        assert_eq!(IndexedObject::extract_parent_prefix("a/b/c.txt"), "a/b/");
        assert_eq!(IndexedObject::extract_parent_prefix("file.txt"), "");
        assert_eq!(IndexedObject::extract_parent_prefix("a/b/"), "a/");
        assert_eq!(IndexedObject::extract_parent_prefix("a/"), "");
        assert_eq!(IndexedObject::extract_parent_prefix("deep/x/y/z.bin"), "deep/x/y/");
    }

    #[test]
    fn test_extract_basename() {
        assert_eq!(IndexedObject::extract_basename("a/b/c.txt"), "c.txt");
        assert_eq!(IndexedObject::extract_basename("file.txt"), "file.txt");
        assert_eq!(IndexedObject::extract_basename("a/b/"), "b");
    }

    #[test]
    fn test_folder_marker_conversion() {
        let obj = S3Object {
            key: "docs/".to_string(),
            size: 0,
            last_modified: None,
            storage_class: None,
            e_tag: None,
            is_folder: false,
        };
        let indexed = IndexedObject::from_s3_object(&obj, "p", "b");
        assert!(indexed.is_folder);
        assert_eq!(indexed.parent_prefix, "");
        assert_eq!(indexed.storage_class, "STANDARD");
    }

    #[test]
    fn test_indexing_config_clamped() {
        let config = IndexingConfig {
            max_initial_requests: 500,
            batch_size: 10,
            stale_ttl_hours: 24,
        };
        let clamped = config.clamped();
        assert_eq!(clamped.max_initial_requests, 100);
        assert_eq!(clamped.batch_size, 100);
    }

    #[test]
    fn test_categorize_s3_error() {
        assert_eq!(
            categorize_s3_error("Access Denied (Service: S3)"),
            S3ErrorCategory::AccessDenied
        );
        assert_eq!(
            categorize_s3_error("NoSuchKey: the key does not exist"),
            S3ErrorCategory::NotFound
        );
        assert_eq!(
            categorize_s3_error("request timed out"),
            S3ErrorCategory::Timeout
        );
        assert_eq!(categorize_s3_error("boom"), S3ErrorCategory::Unknown);
    }
}
