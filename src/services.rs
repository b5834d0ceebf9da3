//! Consumed external interfaces and the guards that scope them.
//!
//! ARCHITECTURE
//! ============
//! The coordinator never talks to a vendor SDK directly. It depends on five
//! narrow traits (auth, change feed, backend data, navigation, notices) that
//! are injected through [`Services`]. Subscriptions handed out by the auth
//! provider and the change feed are owned by RAII guards: dropping a guard
//! releases the listener, so a subscription cannot outlive its scope.
//!
//! TRADE-OFFS
//! ==========
//! Release is synchronous (`unsubscribe`, `remove_channel`) so it can run from
//! `Drop`. Adapters that need network I/O to leave a channel queue the leave
//! onto their own background task.

#[cfg(test)]
#[path = "services_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{AuthError, BackendError, FeedError};
use crate::types::{AuthEvent, ChangeEvent, ChangeKind, Notification, Profile, User};

/// Identifier of an auth listener or change-feed channel.
pub type SubscriptionId = u64;

// =============================================================================
// AUTH PROVIDER
// =============================================================================

/// A live auth-state-change listener.
#[derive(Debug)]
pub struct AuthSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<AuthEvent>,
}

/// Hosted auth provider: session issuance, refresh and sign-out live there.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register a listener for auth-state changes.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// Drop the listener registered under `id`. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// End the current session with the provider.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Fan-out registry of auth listeners, shared by provider adapters.
#[derive(Debug, Default)]
pub struct AuthListeners {
    next_id: AtomicU64,
    senders: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<AuthEvent>>>,
}

impl AuthListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> AuthSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        AuthSubscription { id, events: rx }
    }

    pub fn remove(&self, id: SubscriptionId) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Deliver `event` to every live listener, pruning closed ones.
    pub fn emit(&self, event: &AuthEvent) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Deliver `event` to one listener only.
    pub fn emit_to(&self, id: SubscriptionId, event: AuthEvent) {
        if let Some(tx) = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            let _ = tx.send(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Server-side equality filter (`column = value`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedFilter {
    pub column: String,
    pub value: String,
}

impl FeedFilter {
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self { column: column.into(), value: value.into() }
    }

    /// Render as a PostgREST-style filter, e.g. `to=eq.u1`.
    #[must_use]
    pub fn to_query(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }
}

/// What to subscribe to on the change feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedSpec {
    pub table: String,
    pub filter: FeedFilter,
    pub events: Vec<ChangeKind>,
}

impl FeedSpec {
    /// Insert/update/delete events on `table` for rows owned by `user_id`.
    #[must_use]
    pub fn notifications_for(table: &str, user_id: &str) -> Self {
        Self {
            table: table.to_owned(),
            filter: FeedFilter::eq("to", user_id),
            events: vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete],
        }
    }

    /// Whether events of `kind` were requested.
    #[must_use]
    pub fn wants(&self, kind: ChangeKind) -> bool {
        self.events.contains(&kind)
    }
}

/// A live change-feed channel.
#[derive(Debug)]
pub struct FeedChannel {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Realtime change feed over a backend table.
pub trait ChangeFeed: Send + Sync {
    /// Open a channel delivering row changes matching `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed is shut down or the filter is unusable.
    fn subscribe(&self, spec: FeedSpec) -> Result<FeedChannel, FeedError>;

    /// Close the channel `id`. Unknown ids are ignored.
    fn remove_channel(&self, id: SubscriptionId);
}

// =============================================================================
// BACKEND / NAVIGATION / NOTICES
// =============================================================================

/// Application backend reads.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn current_profile(&self, user: &User) -> Result<Option<Profile>, BackendError>;

    async fn notifications(&self, user: &User) -> Result<Vec<Notification>, BackendError>;
}

/// Router surface used by sign-out.
pub trait Navigator: Send + Sync {
    /// Replace the current history entry with `url`.
    fn replace(&self, url: &Url);

    /// Path of the active route, e.g. `/dashboard`.
    fn current_path(&self) -> String;
}

/// Transient user-facing notices (toasts).
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);

    fn error(&self, message: &str);
}

/// Everything the coordinator consumes, injected at construction.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn AuthProvider>,
    pub feed: Arc<dyn ChangeFeed>,
    pub backend: Arc<dyn Backend>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
}

// =============================================================================
// GUARDS
// =============================================================================

/// Owns an auth listener; unsubscribes on drop.
pub struct AuthGuard {
    provider: Arc<dyn AuthProvider>,
    id: SubscriptionId,
}

impl AuthGuard {
    #[must_use]
    pub fn new(provider: Arc<dyn AuthProvider>, id: SubscriptionId) -> Self {
        Self { provider, id }
    }
}

impl Drop for AuthGuard {
    fn drop(&mut self) {
        self.provider.unsubscribe(self.id);
    }
}

/// Owns a change-feed channel bound to one user id.
///
/// Dropping the guard stops the listener task and removes the channel.
pub struct FeedGuard {
    feed: Arc<dyn ChangeFeed>,
    channel: SubscriptionId,
    user_id: String,
    listener: Option<JoinHandle<()>>,
}

impl FeedGuard {
    #[must_use]
    pub fn new(feed: Arc<dyn ChangeFeed>, channel: SubscriptionId, user_id: String) -> Self {
        Self { feed, channel, user_id, listener: None }
    }

    /// Attach the task draining this channel so it is stopped with the guard.
    #[must_use]
    pub fn with_listener(mut self, listener: JoinHandle<()>) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn channel(&self) -> SubscriptionId {
        self.channel
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        tracing::debug!(channel = self.channel, user_id = %self.user_id, "releasing change feed channel");
        self.feed.remove_channel(self.channel);
    }
}
