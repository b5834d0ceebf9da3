//! Error taxonomy for the session coordinator and its adapters.
//!
//! ERROR HANDLING
//! ==============
//! Each external seam has its own error enum. [`SessionError`] is what
//! consumers see; it wraps the seam errors and adds the context-misuse case.
//! Every enum implements [`ErrorCode`] so failures can be logged and matched
//! by a stable grepable code.

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// AUTH PROVIDER
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Request(String),
    #[error("auth provider returned status {status}: {body}")]
    Status { status: u16, body: String },
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_AUTH_REQUEST",
            Self::Status { .. } => "E_AUTH_STATUS",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// BACKEND
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend response parse failed: {0}")]
    Parse(String),
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_BACKEND_REQUEST",
            Self::Status { .. } => "E_BACKEND_STATUS",
            Self::Parse(_) => "E_BACKEND_PARSE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// CHANGE FEED
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("change feed is closed")]
    Closed,
    #[error("invalid feed filter: {0}")]
    InvalidFilter(String),
    #[error("invalid realtime URL: {0}")]
    InvalidUrl(String),
}

impl ErrorCode for FeedError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "E_FEED_CLOSED",
            Self::InvalidFilter(_) => "E_FEED_FILTER",
            Self::InvalidUrl(_) => "E_FEED_URL",
        }
    }
}

// =============================================================================
// CONFIG / REDIRECT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid URL in {var}: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_CONFIG_MISSING",
            Self::InvalidUrl { .. } => "E_CONFIG_URL",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedirectError {
    #[error("site origin cannot carry a path: {0}")]
    NotABase(String),
}

impl ErrorCode for RedirectError {
    fn error_code(&self) -> &'static str {
        "E_REDIRECT"
    }
}

// =============================================================================
// SESSION (consumer-facing)
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The read surface was used after its owning provider was dropped.
    #[error("session context used outside of its SessionProvider")]
    OutsideProvider,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::OutsideProvider => "E_OUTSIDE_PROVIDER",
            Self::Auth(e) => e.error_code(),
            Self::Backend(e) => e.error_code(),
            Self::Feed(e) => e.error_code(),
            Self::Redirect(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.retryable(),
            Self::Backend(e) => e.retryable(),
            Self::OutsideProvider | Self::Feed(_) | Self::Redirect(_) => false,
        }
    }
}
