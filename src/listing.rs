//! Interface du collaborateur de listing S3
//!
//! Le client S3 reel vit hors du core; le core ne consomme que cette
//! interface etroite. L'implementation de production enveloppe le SDK,
//! les tests utilisent un lister en memoire.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::ListObjectsResponse;

/// Collaborateur de listing pagine sur un store compatible S3
///
/// `use_delimiter = true` groupe les cles partageant le prochain '/' en
/// common_prefixes (navigation par dossiers); `false` retourne les cles
/// a plat, paginees par continuation token.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
        use_delimiter: bool,
    ) -> Result<ListObjectsResponse, AppError>;
}
