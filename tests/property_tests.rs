//! Property-based tests for tether
//!
//! These tests verify invariants that must hold for all inputs:
//! - Paged listings match single-page listings exactly
//! - The incremental cutoff is inclusive and never leaks
//! - Watermarks only move forward
//!
//! Run with: cargo test --test property_tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use tether::remote::{list_all, MemoryRemoteStore};
use tether::sync::{FolderSyncer, SyncDirection, SyncMode};
use tether::SyncSettings;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()
}

// ============================================================================
// PAGINATION
// ============================================================================

mod pagination_tests {
    use super::*;

    fn seeded(page_size: usize, paths: &[String]) -> MemoryRemoteStore {
        let store = MemoryRemoteStore::new().with_page_size(page_size);
        for (i, p) in paths.iter().enumerate() {
            store.put_file(p, vec![i as u8], base());
        }
        store
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Invariant: any page size yields the same entries as one big page
        #[test]
        fn paged_equals_single_page(
            names in prop::collection::btree_set("[a-z]{1,6}(/[a-z]{1,6}){0,2}", 0..40),
            page_size in 1usize..8,
        ) {
            let paths: Vec<String> = names.iter().map(|n| format!("/Notes/{}.txt", n)).collect();
            let rt = runtime();

            let paged = rt.block_on(list_all(&seeded(page_size, &paths), "/Notes", true)).unwrap();
            let single = rt.block_on(list_all(&seeded(10_000, &paths), "/Notes", true)).unwrap();

            let paged_paths: Vec<_> = paged.iter().map(|e| e.path.clone()).collect();
            let single_paths: Vec<_> = single.iter().map(|e| e.path.clone()).collect();
            prop_assert_eq!(&paged_paths, &single_paths);

            let mut files: Vec<_> = paged.iter().filter(|e| e.is_file).map(|e| e.path.clone()).collect();
            files.sort();
            let mut expected = paths.clone();
            expected.sort();
            prop_assert_eq!(files, expected);
        }
    }
}

// ============================================================================
// INCREMENTAL CUTOFF
// ============================================================================

mod cutoff_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant: a file is pushed iff it was modified strictly after the cutoff
        #[test]
        fn push_respects_cutoff(offset_secs in -3600i64..3600) {
            let dir = tempfile::tempdir().unwrap();
            let mtime = base() + Duration::seconds(offset_secs);
            let path = dir.path().join("f.txt");
            std::fs::write(&path, b"f").unwrap();
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime.into())
                .unwrap();

            let store = MemoryRemoteStore::new();
            let report = runtime()
                .block_on(FolderSyncer::new(&store).sync(
                    dir.path(),
                    "/Notes",
                    SyncDirection::PushOnly,
                    SyncMode::Incremental,
                    Some(base()),
                ))
                .unwrap();

            prop_assert_eq!(report.uploaded == 1, offset_secs > 0);
        }

        /// Invariant: a remote file is pulled iff it was modified strictly after the cutoff
        #[test]
        fn pull_respects_cutoff(offset_secs in -3600i64..3600) {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryRemoteStore::new();
            store.put_file("/Notes/r.txt", b"r".to_vec(), base() + Duration::seconds(offset_secs));

            let report = runtime()
                .block_on(FolderSyncer::new(&store).sync(
                    dir.path(),
                    "/Notes",
                    SyncDirection::PullOnly,
                    SyncMode::Incremental,
                    Some(base()),
                ))
                .unwrap();

            prop_assert_eq!(report.downloaded == 1, offset_secs > 0);
        }
    }
}

// ============================================================================
// WATERMARKS
// ============================================================================

mod watermark_tests {
    use super::*;

    fn direction() -> impl Strategy<Value = SyncDirection> {
        prop_oneof![
            Just(SyncDirection::Both),
            Just(SyncDirection::PushOnly),
            Just(SyncDirection::PullOnly),
        ]
    }

    proptest! {
        /// Invariant: recording successes in any order never moves a watermark backward
        #[test]
        fn watermarks_are_monotonic(
            runs in prop::collection::vec((direction(), 0i64..1_000_000), 1..20)
        ) {
            let mut settings = SyncSettings::default();
            for (dir, secs) in runs {
                let before = (settings.last_sync_time, settings.last_push_time, settings.last_pull_time);
                settings.record_success(dir, base() + Duration::seconds(secs));
                prop_assert!(settings.last_sync_time >= before.0);
                prop_assert!(settings.last_push_time >= before.1);
                prop_assert!(settings.last_pull_time >= before.2);
            }
        }
    }
}
