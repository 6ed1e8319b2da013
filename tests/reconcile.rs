//! Integration tests for navigation-time reconciliation, optimistic
//! updates, search, cache control and the metrics surface.

mod common;

use std::sync::Arc;

use common::FakeLister;
use s3_explorer_core::{AppError, CoreEvent};

#[tokio::test]
async fn optimistic_upload_invalidates_completeness_chain() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("up-bkt", "a.txt", 1);

    core.start_initial_index(lister, "p1", "up-bkt", None, None)
        .await
        .unwrap();
    assert!(core.is_bucket_index_complete("p1", "up-bkt").unwrap());

    core.notify_object_uploaded("p1", "up-bkt", "x/y/z.bin", 42, Some("application/octet-stream"))
        .unwrap();

    // L'objet est present dans l'index
    let found = core
        .search_objects_in_index("p1", "up-bkt", "z.bin", None, None)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].size, 42);

    // Toute la chaine d'ancetres existe et a perdu sa completude
    for prefix in ["x/y/", "x/", ""] {
        assert!(core.is_prefix_known("p1", "up-bkt", prefix).unwrap());
        let status = core
            .get_prefix_status("p1", "up-bkt", prefix)
            .unwrap()
            .unwrap();
        assert!(!status.is_complete, "prefix {:?} still complete", prefix);
    }
    assert!(!core.is_bucket_index_complete("p1", "up-bkt").unwrap());
}

#[tokio::test]
async fn upload_notification_emits_object_completed() {
    let (_dir, core) = common::test_core();
    let mut rx = core.subscribe();

    core.notify_object_uploaded("p1", "evt-bkt", "file.bin", 7, None)
        .unwrap();

    loop {
        match rx.recv().await.unwrap() {
            CoreEvent::ObjectCompleted(e) => {
                assert_eq!(e.key, "file.bin");
                assert_eq!(e.size, 7);
                break;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn oversized_key_is_rejected_with_validation_error() {
    let (_dir, core) = common::test_core();

    let max_key = "a".repeat(1024);
    assert!(core
        .notify_object_uploaded("p1", "val-bkt", &max_key, 1, None)
        .is_ok());

    let oversized = "a".repeat(1025);
    let err = core.notify_object_uploaded("p1", "val-bkt", &oversized, 1, None);
    assert!(matches!(err, Err(AppError::ValidationError(_))));
}

#[tokio::test]
async fn optimistic_delete_removes_object_and_beliefs() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("del-bkt", "docs/keep.txt", 1);
    lister.put("del-bkt", "docs/gone.txt", 2);

    core.start_initial_index(lister, "p1", "del-bkt", None, None)
        .await
        .unwrap();
    assert!(core.is_bucket_index_complete("p1", "del-bkt").unwrap());

    core.notify_object_deleted("p1", "del-bkt", "docs/gone.txt")
        .unwrap();

    let found = core
        .search_objects_in_index("p1", "del-bkt", "gone", None, None)
        .unwrap();
    assert!(found.is_empty());

    for prefix in ["docs/", ""] {
        let status = core
            .get_prefix_status("p1", "del-bkt", prefix)
            .unwrap()
            .unwrap();
        assert!(!status.is_complete);
    }
}

#[tokio::test]
async fn folder_delete_clears_subtree() {
    let (_dir, core) = common::test_core();

    core.notify_object_uploaded("p1", "fld-bkt", "dir/a.txt", 1, None)
        .unwrap();
    core.notify_object_uploaded("p1", "fld-bkt", "dir/sub/b.txt", 2, None)
        .unwrap();
    core.notify_object_uploaded("p1", "fld-bkt", "other/c.txt", 3, None)
        .unwrap();

    let deleted = core.notify_folder_deleted("p1", "fld-bkt", "dir/").unwrap();
    assert_eq!(deleted, 2);

    assert!(core
        .search_objects_in_index("p1", "fld-bkt", "a.txt", Some("dir/"), None)
        .unwrap()
        .is_empty());
    assert!(!core.is_prefix_known("p1", "fld-bkt", "dir/").unwrap());

    let stats = core.get_bucket_index_stats("p1", "fld-bkt").unwrap();
    assert_eq!(stats.total_objects, 1);
}

#[tokio::test]
async fn copy_notification_reuses_indexed_metadata() {
    let (_dir, core) = common::test_core();

    core.notify_object_uploaded("p1", "cp-bkt", "src/orig.bin", 512, None)
        .unwrap();
    core.notify_object_copied("p1", "cp-bkt", "src/orig.bin", "cp-bkt", "dst/copy.bin")
        .unwrap();

    let found = core
        .search_objects_in_index("p1", "cp-bkt", "copy.bin", None, None)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].size, 512);

    let dst = core
        .get_prefix_status("p1", "cp-bkt", "dst/")
        .unwrap()
        .unwrap();
    assert!(!dst.is_complete);
}

#[tokio::test]
async fn refresh_with_sync_sweeps_ghost_objects() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    for key in ["a", "b", "c"] {
        lister.put("ghost-bkt", key, 10);
    }

    core.start_initial_index(Arc::<FakeLister>::clone(&lister), "p1", "ghost-bkt", None, None)
        .await
        .unwrap();

    // b supprime par un autre client
    lister.remove("ghost-bkt", "b");

    let response = core
        .list_objects(
            lister.as_ref(),
            "p1",
            "ghost-bkt",
            None,
            None,
            None,
            Some(true),
            Some(true),
        )
        .await
        .unwrap();
    assert_eq!(response.objects.len(), 2);

    // Le fantome est parti, la racine est de nouveau complete
    assert!(core
        .search_objects_in_index("p1", "ghost-bkt", "b", None, None)
        .unwrap()
        .is_empty());

    let root = core
        .get_prefix_status("p1", "ghost-bkt", "")
        .unwrap()
        .unwrap();
    assert!(root.is_complete);

    let stats = core.get_bucket_index_stats("p1", "ghost-bkt").unwrap();
    assert_eq!(stats.total_objects, 2);
    assert_eq!(stats.total_size, 20);
}

#[tokio::test]
async fn pagination_pages_do_not_sweep() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    for i in 0..10 {
        lister.put("page-bkt", &format!("obj{:02}", i), 1);
    }

    // Premiere page (tronquee): pas de balayage meme avec sync_index
    let page1 = core
        .list_objects(
            lister.as_ref(),
            "p1",
            "page-bkt",
            None,
            None,
            Some(4),
            Some(false),
            Some(true),
        )
        .await
        .unwrap();
    assert!(page1.is_truncated);

    // Page suivante: le token entrant desactive aussi le balayage
    let page2 = core
        .list_objects(
            lister.as_ref(),
            "p1",
            "page-bkt",
            None,
            page1.continuation_token.clone(),
            Some(4),
            Some(false),
            Some(true),
        )
        .await
        .unwrap();
    assert_eq!(page2.objects.len(), 4);

    // Les objets de la premiere page sont toujours la
    let stats = core.get_prefix_index_stats("p1", "page-bkt", "").unwrap();
    assert_eq!(stats.objects_count, 8);
}

#[tokio::test]
async fn listing_discovers_folders_without_downgrading() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("nav-bkt", "docs/a.txt", 1);
    lister.put("nav-bkt", "images/b.png", 2);
    lister.put("nav-bkt", "readme.md", 3);

    // Navigation racine en mode delimiter
    let response = core
        .list_objects(
            lister.as_ref(),
            "p1",
            "nav-bkt",
            None,
            None,
            None,
            Some(true),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.objects.len(), 1); // readme.md
    assert_eq!(response.common_prefixes.len(), 2);

    assert!(core.is_prefix_discovered_only("p1", "nav-bkt", "docs/").unwrap());

    // Exploration de docs/: le prefixe devient complet, plus "discovered-only"
    core.list_objects(
        lister.as_ref(),
        "p1",
        "nav-bkt",
        Some("docs/"),
        None,
        None,
        Some(true),
        None,
    )
    .await
    .unwrap();

    assert!(!core.is_prefix_discovered_only("p1", "nav-bkt", "docs/").unwrap());
    let docs = core.get_prefix_status("p1", "nav-bkt", "docs/").unwrap().unwrap();
    assert!(docs.is_complete);
}

#[tokio::test]
async fn search_is_case_insensitive_and_prefix_scoped() {
    let (_dir, core) = common::test_core();

    core.notify_object_uploaded("p1", "search-bkt", "docs/Report_Q1.pdf", 100, None)
        .unwrap();
    core.notify_object_uploaded("p1", "search-bkt", "images/report.png", 200, None)
        .unwrap();

    let all = core
        .search_objects_in_index("p1", "search-bkt", "repo", None, Some(10))
        .unwrap();
    assert_eq!(all.len(), 2);

    let scoped = core
        .search_objects_in_index("p1", "search-bkt", "repo", Some("docs/"), Some(10))
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].key, "docs/Report_Q1.pdf");
}

#[tokio::test]
async fn root_prefix_is_addressable_everywhere() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("root-bkt", "a.txt", 5);

    core.start_initial_index(lister, "p1", "root-bkt", None, None)
        .await
        .unwrap();

    assert!(core.is_prefix_known("p1", "root-bkt", "").unwrap());
    assert!(!core.is_prefix_discovered_only("p1", "root-bkt", "").unwrap());

    let stats = core.get_prefix_index_stats("p1", "root-bkt", "").unwrap();
    assert_eq!(stats.objects_count, 1);
    assert_eq!(stats.total_size, 5);
    assert!(stats.is_complete);
}

#[tokio::test]
async fn permuted_operations_converge_to_same_state() {
    let (_dir, core) = common::test_core();

    // Meme ensemble d'operations, ordre different mais ordre par cle preserve
    let ops_a: [(&str, &str); 4] = [
        ("add", "k1"),
        ("add", "folder/k2"),
        ("del", "k1"),
        ("add", "k3"),
    ];
    let ops_b: [(&str, &str); 4] = [
        ("add", "folder/k2"),
        ("add", "k1"),
        ("add", "k3"),
        ("del", "k1"),
    ];

    for (profile, ops) in [("perm-a", &ops_a), ("perm-b", &ops_b)] {
        for (op, key) in ops.iter() {
            match *op {
                "add" => core
                    .notify_object_uploaded(profile, "perm-bkt", key, 10, None)
                    .unwrap(),
                _ => {
                    core.notify_object_deleted(profile, "perm-bkt", key).unwrap();
                }
            }
        }
    }

    let stats_a = core.get_bucket_index_stats("perm-a", "perm-bkt").unwrap();
    let stats_b = core.get_bucket_index_stats("perm-b", "perm-bkt").unwrap();
    assert_eq!(stats_a.total_objects, stats_b.total_objects);
    assert_eq!(stats_a.total_size, stats_b.total_size);

    for key in ["k1", "folder/k2", "k3"] {
        let in_a = !core
            .search_objects_in_index("perm-a", "perm-bkt", key, None, None)
            .unwrap()
            .is_empty();
        let in_b = !core
            .search_objects_in_index("perm-b", "perm-bkt", key, None, None)
            .unwrap()
            .is_empty();
        assert_eq!(in_a, in_b, "divergence on {:?}", key);
    }

    for prefix in ["", "folder/"] {
        let complete_a = core
            .get_prefix_status("perm-a", "perm-bkt", prefix)
            .unwrap()
            .unwrap()
            .is_complete;
        let complete_b = core
            .get_prefix_status("perm-b", "perm-bkt", prefix)
            .unwrap()
            .unwrap()
            .is_complete;
        assert_eq!(complete_a, complete_b);
    }
}

#[tokio::test]
async fn cache_control_surface() {
    let (_dir, core) = common::test_core();

    core.warmup_profile_cache("warm-profile").unwrap();
    let status = core.get_cache_status();
    assert!(status.database_managers.metrics.insertions >= 1);
    assert!(status.index_managers.metrics.insertions >= 1);

    // Deuxieme warmup: servi depuis le cache
    core.warmup_profile_cache("warm-profile").unwrap();
    let status = core.get_cache_status();
    assert!(status.index_managers.metrics.hits >= 1);

    // Apres eviction, le prochain acces recree les poignees
    core.cleanup_profile_cache("warm-profile").await;
    core.warmup_profile_cache("warm-profile").unwrap();
    let status = core.get_cache_status();
    assert!(status.index_managers.metrics.insertions >= 2);

    core.clear_all_caches().await;
    core.warmup_profile_cache("warm-profile").unwrap();
    let status = core.get_cache_status();
    assert!(status.index_managers.metrics.insertions >= 3);
}

#[tokio::test]
async fn clear_bucket_index_resets_everything() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("clear-bkt", "a.txt", 1);

    core.start_initial_index(lister, "p1", "clear-bkt", None, None)
        .await
        .unwrap();
    assert!(core.is_bucket_indexed("p1", "clear-bkt").unwrap());

    core.clear_bucket_index("p1", "clear-bkt").unwrap();

    assert!(!core.is_bucket_indexed("p1", "clear-bkt").unwrap());
    assert!(!core.is_bucket_index_complete("p1", "clear-bkt").unwrap());
    assert_eq!(
        core.get_bucket_index_stats("p1", "clear-bkt")
            .unwrap()
            .total_objects,
        0
    );
}

#[tokio::test]
async fn index_inventory_and_file_size() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("inv-bkt", "a.txt", 100);

    core.start_initial_index(lister, "p1", "inv-bkt", None, None)
        .await
        .unwrap();

    let indexes = core.get_all_bucket_indexes("p1").unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].bucket_name, "inv-bkt");
    assert_eq!(indexes[0].total_objects, 1);
    assert!(indexes[0].is_complete);
    assert!(indexes[0].estimated_index_size > 0);

    assert!(core.get_index_file_size("p1").unwrap() > 0);
}

#[tokio::test]
async fn metrics_surface_records_listing_requests() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("met-bkt", "a.txt", 1);

    core.list_objects(
        lister.as_ref(),
        "p1",
        "met-bkt",
        None,
        None,
        None,
        Some(true),
        None,
    )
    .await
    .unwrap();

    // La persistance des metriques est fire-and-forget: attendre un peu
    let mut total = 0;
    for _ in 0..20 {
        total = core.get_metrics_today(None).unwrap().total_requests;
        if total > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(total, 1);

    let today = core.get_metrics_today(None).unwrap();
    assert_eq!(today.list_requests, 1);

    let recent = core.get_metrics_recent(10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].operation, "ListObjectsV2");

    // Les lectures servies par l'index ont trace des cache hits
    let _ = core.get_bucket_index_stats("p1", "met-bkt").unwrap();
    let mut hits = 0;
    for _ in 0..20 {
        hits = core.get_today_cache_stats(None).unwrap().hits;
        if hits > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(hits >= 1);

    core.clear_metrics().unwrap();
    assert_eq!(core.get_metrics_storage_info().unwrap().request_count, 0);
}

#[tokio::test]
async fn orphan_prefix_cleanup_is_explicit() {
    let (_dir, core) = common::test_core();
    let lister = Arc::new(FakeLister::new());
    lister.put("orp-bkt", "dir/a.txt", 1);
    lister.put("orp-bkt", "keep/b.txt", 1);

    core.start_initial_index(Arc::<FakeLister>::clone(&lister), "p1", "orp-bkt", None, None)
        .await
        .unwrap();

    // Le dossier disparait du remote; un refresh racine balaye les objets
    // du niveau mais laisse la ligne prefix_status orpheline
    lister.remove("orp-bkt", "dir/a.txt");
    core.list_objects(
        lister.as_ref(),
        "p1",
        "orp-bkt",
        Some("dir/"),
        None,
        None,
        Some(true),
        Some(true),
    )
    .await
    .unwrap();

    assert!(core.is_prefix_known("p1", "orp-bkt", "dir/").unwrap());

    let removed = core.cleanup_orphan_prefixes("p1", "orp-bkt").unwrap();
    assert_eq!(removed, 1);
    assert!(!core.is_prefix_known("p1", "orp-bkt", "dir/").unwrap());
}
