use super::*;

#[test]
fn auth_server_errors_are_retryable() {
    assert!(AuthError::Status { status: 503, body: String::new() }.retryable());
    assert!(AuthError::Request("timeout".into()).retryable());
    assert!(!AuthError::Status { status: 401, body: String::new() }.retryable());
}

#[test]
fn backend_rate_limit_is_retryable() {
    assert!(BackendError::Status { status: 429, body: String::new() }.retryable());
    assert!(!BackendError::Parse("bad".into()).retryable());
}

#[test]
fn session_error_forwards_inner_code() {
    let err = SessionError::from(BackendError::Parse("x".into()));
    assert_eq!(err.error_code(), "E_BACKEND_PARSE");
    assert_eq!(err.to_string(), "backend response parse failed: x");
}

#[test]
fn outside_provider_has_descriptive_message() {
    let err = SessionError::OutsideProvider;
    assert_eq!(err.error_code(), "E_OUTSIDE_PROVIDER");
    assert!(err.to_string().contains("SessionProvider"));
    assert!(!err.retryable());
}

#[test]
fn session_error_wraps_feed_failure() {
    let err = SessionError::from(FeedError::Closed);
    assert_eq!(err.error_code(), "E_FEED_CLOSED");
    assert_eq!(err.to_string(), "change feed is closed");
    assert!(!err.retryable());
}
