//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that persisted settings records
//! keep loading the same way. Any change in behavior will cause these tests
//! to fail, signaling a potential breaking change to the settings format.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

// ============================================================================
// SETTINGS RECORD GOLDEN TESTS
// ============================================================================

mod settings_golden {
    use super::*;
    use tether::settings::SyncSettings;

    #[derive(Debug, Deserialize)]
    struct Expected {
        enabled: bool,
        authenticated: bool,
        categories: Vec<String>,
        on_start: bool,
        on_stop: bool,
        has_watermarks: bool,
    }

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        input: serde_json::Value,
        expected: Expected,
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        test_cases: Vec<TestCase>,
    }

    fn load_fixture() -> Fixture {
        let fixture_path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/settings_records.json"
        );
        let content = fs::read_to_string(fixture_path)
            .expect("Failed to read settings_records.json fixture");
        serde_json::from_str(&content).expect("Failed to parse fixture JSON")
    }

    #[test]
    fn test_settings_records_golden() {
        for case in load_fixture().test_cases {
            let settings: SyncSettings = serde_json::from_value(case.input.clone())
                .unwrap_or_else(|e| panic!("Case '{}': failed to load: {}", case.name, e));

            assert_eq!(settings.enabled, case.expected.enabled, "Case '{}': enabled", case.name);
            assert_eq!(
                settings.is_authenticated(),
                case.expected.authenticated,
                "Case '{}': authenticated",
                case.name
            );
            let categories: Vec<String> = settings
                .enabled_categories()
                .iter()
                .map(|c| c.to_string())
                .collect();
            assert_eq!(categories, case.expected.categories, "Case '{}': categories", case.name);
            assert_eq!(settings.sync_on_start, case.expected.on_start, "Case '{}': on_start", case.name);
            assert_eq!(settings.sync_on_stop, case.expected.on_stop, "Case '{}': on_stop", case.name);
            assert_eq!(
                settings.last_sync_time.is_some()
                    && settings.last_push_time.is_some()
                    && settings.last_pull_time.is_some(),
                case.expected.has_watermarks,
                "Case '{}': watermarks",
                case.name
            );
        }
    }

    #[test]
    fn test_settings_records_survive_save_and_reload() {
        for case in load_fixture().test_cases {
            let settings: SyncSettings = serde_json::from_value(case.input).unwrap();
            let saved = serde_json::to_string(&settings).unwrap();
            let reloaded: SyncSettings = serde_json::from_str(&saved).unwrap();
            assert_eq!(reloaded, settings, "Case '{}': reload mismatch", case.name);
        }
    }
}
