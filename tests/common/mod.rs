//! Shared test fixtures: an in-memory listing collaborator with real
//! pagination and delimiter grouping, and a Core wired to a temp data dir.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use s3_explorer_core::{
    AppError, Core, CoreConfig, ListObjectsResponse, ObjectLister, S3Object,
};

/// In-memory bucket store implementing the listing collaborator.
///
/// Keys are served in lexicographic order; the continuation token is the
/// last key of the page, flat pages are bounded by max_keys, delimiter
/// mode groups keys sharing the next '/' into common prefixes.
pub struct FakeLister {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, i64>>>,
    pub requests: AtomicU32,
    page_delay_ms: u64,
    fail_after: AtomicU32,
}

impl FakeLister {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            requests: AtomicU32::new(0),
            page_delay_ms: 0,
            fail_after: AtomicU32::new(u32::MAX),
        }
    }

    /// Add latency to each listing call (for cancellation tests)
    pub fn with_page_delay(ms: u64) -> Self {
        Self {
            page_delay_ms: ms,
            ..Self::new()
        }
    }

    pub fn put(&self, bucket: &str, key: &str, size: i64) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), size);
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
            objects.remove(key);
        }
    }

    /// Fail every listing call after the first `n` succeeded
    pub fn set_fail_after(&self, n: u32) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectLister for FakeLister {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
        use_delimiter: bool,
    ) -> Result<ListObjectsResponse, AppError> {
        let request_no = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if request_no > self.fail_after.load(Ordering::SeqCst) {
            return Err(AppError::S3Error("injected listing failure".to_string()));
        }

        if self.page_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.page_delay_ms)).await;
        }

        let snapshot: Vec<(String, i64)> = {
            let guard = self.buckets.lock().unwrap();
            guard
                .get(bucket)
                .map(|objects| {
                    objects
                        .iter()
                        .map(|(k, v)| (k.clone(), *v))
                        .collect()
                })
                .unwrap_or_default()
        };

        let prefix = prefix.unwrap_or("");
        let page_size = max_keys.unwrap_or(1000).max(1) as usize;

        let matching: Vec<(String, i64)> = snapshot
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| {
                continuation_token
                    .as_deref()
                    .map_or(true, |t| k.as_str() > t)
            })
            .collect();

        let to_object = |key: String, size: i64| S3Object {
            is_folder: key.ends_with('/'),
            key,
            size,
            last_modified: Some(1_700_000_000_000),
            storage_class: Some("STANDARD".to_string()),
            e_tag: Some("test-etag".to_string()),
        };

        if use_delimiter {
            let mut objects = Vec::new();
            let mut common: BTreeSet<String> = BTreeSet::new();

            for (key, size) in matching {
                let rest = &key[prefix.len()..];
                if let Some(pos) = rest.find('/') {
                    common.insert(format!("{}{}", prefix, &rest[..=pos]));
                } else {
                    objects.push(to_object(key, size));
                }
            }

            Ok(ListObjectsResponse {
                objects,
                common_prefixes: common.into_iter().collect(),
                continuation_token: None,
                is_truncated: false,
            })
        } else {
            let is_truncated = matching.len() > page_size;
            let page: Vec<(String, i64)> = matching.into_iter().take(page_size).collect();
            let continuation_token = if is_truncated {
                page.last().map(|(k, _)| k.clone())
            } else {
                None
            };

            Ok(ListObjectsResponse {
                objects: page.into_iter().map(|(k, s)| to_object(k, s)).collect(),
                common_prefixes: vec![],
                continuation_token,
                is_truncated,
            })
        }
    }
}

/// Build a Core backed by a temp data directory
pub fn test_core() -> (tempfile::TempDir, Arc<Core>) {
    let dir = tempfile::tempdir().unwrap();
    let core = Core::new(CoreConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();
    (dir, Arc::new(core))
}
