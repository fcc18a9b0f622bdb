//! Table-driven tests for configuration loading and validation.

use std::io::Write;
use std::time::Duration;

use transync::config::{load_config, load_config_from_str};
use transync::SyncConfig;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_empty",
        config_json: "{}",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "apiUrl": "https://translate.example.com/",
            "pollIntervalSecs": 3,
            "pageLimit": 250,
            "streamIdleTimeoutSecs": 90,
            "failureThreshold": 4,
            "changeChannelCapacity": 512
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_json",
        config_json: r#"{ "apiUrl": "#,
        should_succeed: false,
        expected_error: Some("parse"),
    },
    ConfigTestCase {
        name: "invalid_wrong_type",
        config_json: r#"{ "pollIntervalSecs": "five" }"#,
        should_succeed: false,
        expected_error: Some("parse"),
    },
    ConfigTestCase {
        name: "invalid_scheme",
        config_json: r#"{ "apiUrl": "ws://localhost:8080" }"#,
        should_succeed: false,
        expected_error: Some("http or https"),
    },
    ConfigTestCase {
        name: "invalid_zero_interval",
        config_json: r#"{ "pollIntervalSecs": 0 }"#,
        should_succeed: false,
        expected_error: Some("pollIntervalSecs"),
    },
    ConfigTestCase {
        name: "invalid_page_limit",
        config_json: r#"{ "pageLimit": 5000 }"#,
        should_succeed: false,
        expected_error: Some("pageLimit"),
    },
    ConfigTestCase {
        name: "invalid_zero_idle_timeout",
        config_json: r#"{ "streamIdleTimeoutSecs": 0 }"#,
        should_succeed: false,
        expected_error: Some("streamIdleTimeoutSecs"),
    },
    ConfigTestCase {
        name: "invalid_zero_threshold",
        config_json: r#"{ "failureThreshold": 0 }"#,
        should_succeed: false,
        expected_error: Some("failureThreshold"),
    },
    ConfigTestCase {
        name: "invalid_zero_capacity",
        config_json: r#"{ "changeChannelCapacity": 0 }"#,
        should_succeed: false,
        expected_error: Some("changeChannelCapacity"),
    },
];

#[test]
fn test_json_config_loading() {
    for test_case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(test_case.config_json);

        if test_case.should_succeed {
            assert!(
                result.is_ok(),
                "Test '{}': Expected success but got error: {:?}",
                test_case.name,
                result.err()
            );
        } else {
            assert!(
                result.is_err(),
                "Test '{}': Expected error but got success",
                test_case.name
            );

            if let Some(expected_error) = test_case.expected_error {
                let error_msg = result.err().unwrap().to_string();
                assert!(
                    error_msg.contains(expected_error),
                    "Test '{}': Expected error containing '{}', got '{}'",
                    test_case.name,
                    expected_error,
                    error_msg
                );
            }
        }
    }
}

#[test]
fn test_config_defaults_applied() {
    let config = load_config_from_str(r#"{ "apiUrl": "http://backend-api:8080" }"#).unwrap();

    assert_eq!(config.api_url, "http://backend-api:8080");
    assert_eq!(config.poll_interval(), Duration::from_secs(5));
    assert_eq!(config.page_limit, 100);
    assert_eq!(config.stream_idle_timeout(), None);
    assert_eq!(config.failure_threshold, 3);
}

#[test]
fn test_config_file_round_trip() {
    let config = SyncConfig {
        api_url: "https://jobs.example.org".to_string(),
        stream_idle_timeout_secs: Some(45),
        ..SyncConfig::default()
    };

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string_pretty(&config).unwrap().as_bytes())
        .unwrap();

    assert_eq!(load_config(file.path()).unwrap(), config);
}
