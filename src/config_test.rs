use super::*;

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__BRANCHSCOPE_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__BRANCHSCOPE_TEST_VALID__", " 99 ") };
    let val: u64 = env_parse("__BRANCHSCOPE_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__BRANCHSCOPE_TEST_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__BRANCHSCOPE_TEST_INVALID__", "soon") };
    let val: u32 = env_parse("__BRANCHSCOPE_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__BRANCHSCOPE_TEST_INVALID__") };
}

// =============================================================================
// CoreConfig
// =============================================================================

#[test]
fn defaults_match_constants() {
    let config = CoreConfig::default();
    assert_eq!(config.watcher.batch_delay_ms, 50);
    assert_eq!(config.watcher.throttle_ms, 100);
    assert_eq!(config.navigator.max_retries, 3);
    assert!(!config.navigator.allow_wrap);
    assert_eq!(config.persistence.prefix, "branchscope_");
    assert_eq!(config.persistence.stale_after_ms, 2_592_000_000);
}

#[test]
fn from_json_overrides_nested_fields_only() {
    let config = CoreConfig::from_json(r#"{ "navigator": { "allow_wrap": true }, "persistence": { "prefix": "x_" } }"#)
        .unwrap();
    assert!(config.navigator.allow_wrap);
    assert_eq!(config.navigator.click_delay_ms, DEFAULT_CLICK_DELAY_MS);
    assert_eq!(config.persistence.prefix, "x_");
    assert_eq!(config.persistence.quota_bytes, DEFAULT_QUOTA_BYTES);
}

#[test]
fn from_json_rejects_garbage() {
    let err = CoreConfig::from_json("{ nope").unwrap_err();
    assert_eq!(err.code(), "serialization");
}
