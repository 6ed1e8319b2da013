//! Coeur d'indexation de S3 Explorer
//!
//! Sous-systeme d'index local et de coherence de cache pour un client de
//! stockage objet compatible S3: une base SQLite par profil qui repond a
//! "que contient ce bucket / ce prefixe / quelle taille" sans re-lister le
//! remote a chaque navigation.
//!
//! Le contrat central est la completude par prefixe: une ligne
//! `prefix_status` marquee complete affirme que tous les enfants directs
//! du prefixe sont indexes; toute mutation sous un prefixe invalide cette
//! croyance pour lui et ses ancetres. L'UI, le client S3 et le stockage
//! des credentials vivent hors de cette crate et ne la consomment qu'a
//! travers [`Core`] et le trait [`ObjectLister`].

mod cache_manager;
mod core;
mod database;
mod errors;
mod events;
mod index_manager;
mod listing;
mod metrics_store;
mod models;
mod operations;
mod validation;

pub use crate::cache_manager::{CacheConfig, CacheMetricsSnapshot, CacheStatus};
pub use crate::core::{Core, CoreConfig};
pub use crate::database::DatabaseManager;
pub use crate::errors::{AppError, ErrorResponse};
pub use crate::events::{
    CoreEvent, EventBus, EventSink, IndexProgressEvent, IndexStatus, ObjectCompletedEvent,
};
pub use crate::index_manager::IndexManager;
pub use crate::listing::ObjectLister;
pub use crate::metrics_store::{
    calculate_cost, BucketUsageStats, CacheEvent, CacheSummary, DailyCacheStats, DailyStats,
    ErrorStats, HourlyStats, MetricsStore, OperationStats, RequestRecord, S3Pricing, StorageInfo,
    DEFAULT_RETENTION_DAYS,
};
pub use crate::models::{
    categorize_s3_error, BucketIndexMetadata, BucketIndexStats, BucketInfo, IndexedObject,
    IndexingConfig, InitialIndexResult, ListObjectsResponse, PrefixStats, PrefixStatus,
    RequestCategory, S3ErrorCategory, S3MetricsEvent, S3Object, S3Operation, StorageClassStats,
};
pub use crate::operations::AllCachesStatus;
pub use crate::validation::{validate_bucket_name, validate_object_key, validate_prefix};
