use super::*;

// =============================================================================
// Env manipulation requires unsafe in edition 2024. Each test owns the
// variables it touches; shared names are only touched by one test.
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__SESSION_SYNC_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_invalid_returns_default() {
    unsafe { std::env::set_var("__SESSION_SYNC_TEST_INVALID__", "soon") };
    let val: u64 = env_parse("__SESSION_SYNC_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__SESSION_SYNC_TEST_INVALID__") };
}

#[test]
fn session_config_from_env() {
    unsafe {
        std::env::set_var("SITE_URL", "https://app.example.com");
        std::env::set_var("NOTIFICATIONS_TABLE", "inbox");
        std::env::remove_var("SIGN_OUT_NOTICE");
    }
    let config = SessionConfig::from_env().unwrap();
    assert_eq!(config.site_url.as_str(), "https://app.example.com/");
    assert_eq!(config.notifications_table, "inbox");
    assert_eq!(config.sign_out_notice, DEFAULT_SIGN_OUT_NOTICE);

    unsafe { std::env::set_var("SITE_URL", "not a url") };
    let err = SessionConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl { var: "SITE_URL", .. }));

    unsafe {
        std::env::remove_var("SITE_URL");
        std::env::remove_var("NOTIFICATIONS_TABLE");
    }
    let err = SessionConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Missing("SITE_URL")));
}

#[test]
fn api_config_from_env() {
    unsafe {
        std::env::set_var("API_URL", "https://proj.example.co");
        std::env::remove_var("API_KEY");
    }
    assert!(matches!(ApiConfig::from_env().unwrap_err(), ConfigError::Missing("API_KEY")));

    unsafe {
        std::env::set_var("API_KEY", "anon");
        std::env::set_var("ACCESS_TOKEN", "  ");
        std::env::set_var("API_REQUEST_TIMEOUT_SECS", "5");
        std::env::remove_var("API_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("REALTIME_HEARTBEAT_SECS");
    }
    let config = ApiConfig::from_env().unwrap();
    assert_eq!(config.api_key, "anon");
    assert!(config.access_token.is_none());
    assert_eq!(config.timeouts.request_secs, 5);
    assert_eq!(config.timeouts.connect_secs, DEFAULT_API_CONNECT_TIMEOUT_SECS);
    assert_eq!(config.heartbeat_secs, DEFAULT_REALTIME_HEARTBEAT_SECS);

    unsafe {
        std::env::remove_var("API_URL");
        std::env::remove_var("API_KEY");
        std::env::remove_var("ACCESS_TOKEN");
        std::env::remove_var("API_REQUEST_TIMEOUT_SECS");
    }
}

#[test]
fn endpoint_joins_without_double_slash() {
    let config = ApiConfig {
        api_url: Url::parse("https://proj.example.co/").unwrap(),
        api_key: "k".into(),
        access_token: None,
        timeouts: ApiTimeouts::default(),
        heartbeat_secs: DEFAULT_REALTIME_HEARTBEAT_SECS,
    };
    assert_eq!(config.endpoint("/auth/v1/user"), "https://proj.example.co/auth/v1/user");
}

#[test]
fn endpoint_keeps_base_path_prefix() {
    let config = ApiConfig {
        api_url: Url::parse("http://127.0.0.1:54321/project").unwrap(),
        api_key: "k".into(),
        access_token: None,
        timeouts: ApiTimeouts::default(),
        heartbeat_secs: 1,
    };
    assert_eq!(config.endpoint("rest/v1/notifications"), "http://127.0.0.1:54321/project/rest/v1/notifications");
}
