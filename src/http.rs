//! HTTP adapters for the hosted auth provider and the REST backend.
//!
//! DESIGN
//! ======
//! Thin `reqwest` wrappers over the provider's `/auth/v1` and `/rest/v1`
//! endpoints. Body parsing lives in small pure functions so it can be tested
//! without a server. The auth adapter owns the session token and fans
//! auth-state changes out to listeners; the backend reads the token through
//! [`TokenSource`] so both share one session.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures and non-2xx statuses map to typed errors carrying the
//! status and body. A 401/403 from `/auth/v1/user` is not an error: it means
//! there is no session, and listeners are told so.

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::{ApiConfig, ApiTimeouts, DEFAULT_NOTIFICATIONS_TABLE};
use crate::error::{AuthError, BackendError};
use crate::services::{AuthListeners, AuthProvider, AuthSubscription, Backend, SubscriptionId};
use crate::types::{AuthChange, AuthEvent, Notification, Profile, Session, User};

pub const DEFAULT_PROFILES_TABLE: &str = "profiles";

fn build_client(timeouts: ApiTimeouts) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeouts.request_secs))
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .build()
}

/// Supplies the bearer token for backend calls.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

// =============================================================================
// AUTH
// =============================================================================

/// Auth provider backed by the `/auth/v1` HTTP API.
pub struct HttpAuth {
    config: ApiConfig,
    http: reqwest::Client,
    listeners: AuthListeners,
    session: Mutex<Option<Session>>,
    resolved: AtomicBool,
}

impl HttpAuth {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self, AuthError> {
        let http = build_client(config.timeouts).map_err(|e| AuthError::Request(e.to_string()))?;
        Ok(Self {
            config,
            http,
            listeners: AuthListeners::new(),
            session: Mutex::new(None),
            resolved: AtomicBool::new(false),
        })
    }

    /// The current session, if one has been restored.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve the configured access token into a session and announce it
    /// to listeners as the initial session.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an unexpected status.
    pub async fn restore(&self) -> Result<Option<Session>, AuthError> {
        let session = match self.config.access_token.clone() {
            Some(token) => self.fetch_session(token).await?,
            None => None,
        };
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session.clone();
        self.resolved.store(true, Ordering::SeqCst);
        tracing::info!(signed_in = session.is_some(), "auth session restored");
        self.listeners.emit(&AuthEvent { change: AuthChange::InitialSession, session: session.clone() });
        Ok(session)
    }

    async fn fetch_session(&self, token: String) -> Result<Option<Session>, AuthError> {
        let response = self
            .http
            .get(self.config.endpoint("auth/v1/user"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        match status {
            200..=299 => {
                let user = parse_user(&text)?;
                Ok(Some(Session { access_token: token, user }))
            }
            401 | 403 => Ok(None),
            _ => Err(AuthError::Status { status, body: text }),
        }
    }
}

impl TokenSource for HttpAuth {
    fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }
}

#[async_trait::async_trait]
impl AuthProvider for HttpAuth {
    fn on_auth_state_change(&self) -> AuthSubscription {
        let subscription = self.listeners.subscribe();
        // Late subscribers still learn the already-resolved session.
        if self.resolved.load(Ordering::SeqCst) {
            self.listeners.emit_to(
                subscription.id,
                AuthEvent { change: AuthChange::InitialSession, session: self.session() },
            );
        }
        subscription
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(id);
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(token) = self.access_token() {
            let response = self
                .http
                .post(self.config.endpoint("auth/v1/logout"))
                .header("apikey", &self.config.api_key)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| AuthError::Request(e.to_string()))?;

            let status = response.status().as_u16();
            // 401: the token is already dead, which is the outcome we want.
            if !(200..=299).contains(&status) && status != 401 {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Status { status, body });
            }
        }

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.listeners.emit(&AuthEvent::signed_out());
        Ok(())
    }
}

// =============================================================================
// BACKEND
// =============================================================================

/// Application backend over PostgREST-style `/rest/v1` tables.
pub struct HttpBackend {
    config: ApiConfig,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    profiles_table: String,
    notifications_table: String,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ApiConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, BackendError> {
        let http = build_client(config.timeouts).map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(Self {
            config,
            http,
            tokens,
            profiles_table: DEFAULT_PROFILES_TABLE.to_owned(),
            notifications_table: DEFAULT_NOTIFICATIONS_TABLE.to_owned(),
        })
    }

    #[must_use]
    pub fn with_notifications_table(mut self, table: impl Into<String>) -> Self {
        self.notifications_table = table.into();
        self
    }

    async fn get_rows<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>, BackendError> {
        let bearer = self
            .tokens
            .access_token()
            .unwrap_or_else(|| self.config.api_key.clone());
        let response = self
            .http
            .get(self.config.endpoint(&format!("rest/v1/{table}")))
            .query(query)
            .header("apikey", &self.config.api_key)
            .header("Accept", "application/json")
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !(200..=299).contains(&status) {
            return Err(BackendError::Status { status, body: text });
        }
        parse_rows(&text)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn current_profile(&self, user: &User) -> Result<Option<Profile>, BackendError> {
        let query = [("id", format!("eq.{}", user.id)), ("select", "*".to_owned()), ("limit", "1".to_owned())];
        let rows: Vec<Profile> = self.get_rows(&self.profiles_table, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn notifications(&self, user: &User) -> Result<Vec<Notification>, BackendError> {
        let query = [
            ("to", format!("eq.{}", user.id)),
            ("select", "*".to_owned()),
            ("order", "created_at.asc".to_owned()),
        ];
        self.get_rows(&self.notifications_table, &query).await
    }
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_user(text: &str) -> Result<User, AuthError> {
    serde_json::from_str(text).map_err(|e| AuthError::Request(format!("unexpected user payload: {e}")))
}

fn parse_rows<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::Parse(e.to_string()))
}
