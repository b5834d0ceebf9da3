//! Session State Coordinator.
//!
//! ARCHITECTURE
//! ============
//! [`SessionProvider`] is the owning scope. Mounting it builds a
//! [`SessionCoordinator`], registers the auth listener and, once a user is
//! known, the per-user change-feed channel. Consumers get a
//! [`SessionContext`], a weak handle that fails with
//! [`SessionError::OutsideProvider`] once the provider is gone.
//!
//! The snapshot lives in a `watch` channel. The coordinator is its only
//! writer and every publication replaces the whole value, so readers never
//! see `user` without the matching `authenticated`, or a profile without the
//! notifications fetched alongside it.
//!
//! CONCURRENCY
//! ===========
//! Every auth transition takes a monotonic generation token inside the same
//! write that installs the new user. Profile/notification fetches run on
//! spawned tasks and only publish if their token is still current, so a slow
//! fetch for an earlier event never overwrites a later one.
//!
//! ERROR HANDLING
//! ==============
//! Fetch failures are logged, surfaced through `error`, and leave the prior
//! profile/notifications in place. A change-feed subscribe failure stays in
//! `error` until a later subscribe succeeds. A failed provider sign-out sets
//! `error`, emits an error notice and changes nothing else.

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{BackendError, ErrorCode, SessionError};
use crate::redirect::sign_out_redirect;
use crate::services::{AuthGuard, Backend, FeedGuard, FeedSpec, Services};
use crate::snapshot::{self, Action, Snapshot};
use crate::types::{AuthEvent, ChangeEvent, Notification, Profile, User, View};

// =============================================================================
// PROVIDER (owning scope)
// =============================================================================

/// Owns the coordinator and its subscriptions for the lifetime of a scope.
///
/// Dropping the provider stops the auth listener, unsubscribes from the auth
/// provider, releases the change-feed channel and detaches every
/// [`SessionContext`] handed out.
pub struct SessionProvider {
    coordinator: Arc<SessionCoordinator>,
    auth_listener: JoinHandle<()>,
    _auth_guard: AuthGuard,
}

impl SessionProvider {
    /// Mount a coordinator seeded with `seed`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn mount(services: Services, config: SessionConfig, seed: Snapshot) -> Self {
        let runtime = Handle::current();
        let (state, _) = watch::channel(seed);
        let coordinator = Arc::new_cyclic(|weak| SessionCoordinator {
            state,
            services,
            config,
            generation: AtomicU64::new(0),
            feed: Mutex::new(None),
            feed_error: Mutex::new(None),
            mounted: AtomicBool::new(true),
            runtime: runtime.clone(),
            self_ref: weak.clone(),
        });

        let subscription = coordinator.services.auth.on_auth_state_change();
        let auth_guard = AuthGuard::new(Arc::clone(&coordinator.services.auth), subscription.id);
        let auth_listener = runtime.spawn(listen_auth(Arc::downgrade(&coordinator), subscription.events));

        // A server-rendered seed may already carry a user.
        if let Err(e) = coordinator.sync_feed() {
            warn!(code = e.error_code(), error = %e, "change feed subscribe failed");
            coordinator.set_error(Some(e.to_string()));
        }
        info!(auth_listener = subscription.id, "session provider mounted");

        Self { coordinator, auth_listener, _auth_guard: auth_guard }
    }

    /// Handle for descendant consumers.
    #[must_use]
    pub fn context(&self) -> SessionContext {
        SessionContext { inner: Arc::downgrade(&self.coordinator) }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        self.coordinator.mounted.store(false, Ordering::SeqCst);
        self.auth_listener.abort();
        self.coordinator.release_feed();
        info!("session provider unmounted");
    }
}

// =============================================================================
// CONTEXT (consumer handle)
// =============================================================================

/// Cloneable read/act surface passed down to consumers.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    inner: Weak<SessionCoordinator>,
}

impl SessionContext {
    /// A context that was never attached to a provider.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Resolve the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OutsideProvider`] if the owning provider has
    /// been dropped or never existed.
    pub fn get(&self) -> Result<Arc<SessionCoordinator>, SessionError> {
        self.inner
            .upgrade()
            .filter(|c| c.mounted.load(Ordering::SeqCst))
            .ok_or(SessionError::OutsideProvider)
    }

    /// Current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OutsideProvider`] outside the provider's lifetime.
    pub fn snapshot(&self) -> Result<Snapshot, SessionError> {
        Ok(self.get()?.snapshot())
    }

    /// Receiver notified on every published snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OutsideProvider`] outside the provider's lifetime.
    pub fn watch(&self) -> Result<watch::Receiver<Snapshot>, SessionError> {
        Ok(self.get()?.watch())
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Single writer of the session snapshot.
pub struct SessionCoordinator {
    state: watch::Sender<Snapshot>,
    services: Services,
    config: SessionConfig,
    generation: AtomicU64,
    feed: Mutex<Option<FeedGuard>>,
    /// Last change-feed subscribe failure for the current user.
    feed_error: Mutex<Option<String>>,
    mounted: AtomicBool,
    runtime: Handle,
    self_ref: Weak<SessionCoordinator>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("mounted", &self.mounted.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    /// Generation of the most recent user transition.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // mutators
    // -------------------------------------------------------------------------

    /// Apply and publish one action.
    ///
    /// [`Action::SetUser`] is routed through [`Self::set_user`] so the feed
    /// subscription follows the user.
    pub fn dispatch(&self, action: Action) {
        match action {
            Action::SetUser(user) => self.set_user(user),
            other => self.state.send_modify(|s| s.apply(other)),
        }
    }

    pub fn set_error(&self, message: Option<String>) {
        self.dispatch(Action::SetError(message));
    }

    pub fn set_profile(&self, profile: Option<Profile>) {
        self.dispatch(Action::SetProfile(profile));
    }

    pub fn set_view(&self, view: View) {
        self.dispatch(Action::SetView(view));
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.dispatch(Action::SetNotifications(notifications));
    }

    /// Replace `user` and `authenticated` together, then re-home the feed.
    pub fn set_user(&self, user: Option<User>) {
        self.transition(user, Vec::new(), false);
    }

    /// Install `user` plus `extra` actions in one publication, bumping the
    /// generation inside the same write. Returns the new generation.
    ///
    /// With `clear_on_switch`, a change of user id also drops the previous
    /// owner's profile and notifications in that same write.
    fn transition(&self, user: Option<User>, extra: Vec<Action>, clear_on_switch: bool) -> u64 {
        let next_id = user.as_ref().filter(|u| u.has_identity()).map(|u| u.id.clone());
        // The old owner's listener must be gone before the new user is visible.
        self.release_feed_unless(next_id.as_deref());

        let mut generation = 0;
        self.state.send_modify(|s| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let switched = s.user_id() != next_id.as_deref();
            s.apply(Action::SetUser(user));
            if clear_on_switch && switched {
                s.apply(Action::SetProfile(None));
                s.apply(Action::SetNotifications(Vec::new()));
            }
            for action in extra {
                s.apply(action);
            }
        });
        if let Err(e) = self.sync_feed() {
            warn!(code = e.error_code(), error = %e, "change feed subscribe failed");
            self.set_error(Some(e.to_string()));
        }
        generation
    }

    // -------------------------------------------------------------------------
    // sign-out
    // -------------------------------------------------------------------------

    /// Sign out with the provider, navigate away and clear the local session.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect cannot be built or the provider
    /// rejects the sign-out. In the latter case `error` is set, an error
    /// notice is emitted and nothing else changes.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let path = self.services.navigator.current_path();
        let target = sign_out_redirect(&self.config.site_url, &path)?;
        info!(redirect = %target, "signing out");

        if let Err(e) = self.services.auth.sign_out().await {
            warn!(code = e.error_code(), error = %e, "provider sign-out failed");
            let message = e.to_string();
            self.set_error(Some(message.clone()));
            self.services.notifier.error(&message);
            return Err(e.into());
        }

        self.services.navigator.replace(&target);
        self.transition(None, vec![Action::SetProfile(None), Action::SetError(None)], false);
        self.services.notifier.success(&self.config.sign_out_notice);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // auth stream
    // -------------------------------------------------------------------------

    /// Reconcile local state with one auth-state-change event.
    ///
    /// With a session: install the user and spawn the profile/notification
    /// fetch, returning its handle. Without one: clear user, profile and
    /// notifications immediately.
    pub fn handle_auth_event(&self, event: AuthEvent) -> Option<JoinHandle<()>> {
        let user = event.session.map(|s| s.user).filter(User::has_identity);
        let Some(user) = user else {
            let generation = self.transition(
                None,
                vec![
                    Action::SetProfile(None),
                    Action::SetNotifications(Vec::new()),
                    Action::SetLoading(false),
                ],
                true,
            );
            info!(change = ?event.change, generation, "auth state changed: no session");
            return None;
        };

        let generation = self.transition(Some(user.clone()), Vec::new(), true);
        info!(change = ?event.change, generation, user_id = %user.id, "auth state changed: session");

        let backend = Arc::clone(&self.services.backend);
        let weak = self.self_ref.clone();
        Some(self.runtime.spawn(async move {
            let (profile, notifications) = fetch_session_data(backend.as_ref(), &user).await;
            if let Some(this) = weak.upgrade() {
                this.finish_reconcile(generation, &user, profile, notifications);
            }
        }))
    }

    fn finish_reconcile(
        &self,
        generation: u64,
        user: &User,
        profile: Result<Option<Profile>, BackendError>,
        notifications: Result<Vec<Notification>, BackendError>,
    ) {
        let mut actions = Vec::with_capacity(4);
        let mut failure: Option<SessionError> = None;

        match profile {
            Ok(profile) => actions.push(Action::SetProfile(profile)),
            Err(e) => {
                warn!(user_id = %user.id, code = e.error_code(), error = %e, "profile fetch failed");
                failure.get_or_insert(e.into());
            }
        }
        match notifications {
            Ok(list) => actions.push(Action::SetNotifications(list)),
            Err(e) => {
                warn!(user_id = %user.id, code = e.error_code(), error = %e, "notifications fetch failed");
                failure.get_or_insert(e.into());
            }
        }
        // A dead change feed stays reported until a subscribe succeeds.
        let message = failure
            .map(|e| e.to_string())
            .or_else(|| self.feed_error.lock().unwrap_or_else(PoisonError::into_inner).clone());
        actions.push(Action::SetError(message));
        actions.push(Action::SetLoading(false));

        let applied = self.state.send_if_modified(|s| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            for action in actions {
                s.apply(action);
            }
            true
        });
        if !applied {
            debug!(user_id = %user.id, generation, current = self.generation(), "dropping stale session fetch");
        }
    }

    // -------------------------------------------------------------------------
    // change feed
    // -------------------------------------------------------------------------

    /// Patch the notification list with one change-feed event.
    ///
    /// Inserts and updates for a record owned by someone other than the
    /// current user are dropped.
    pub fn apply_change(&self, event: ChangeEvent) {
        let kind = event.kind();
        let mut notice = None;
        let applied = self.state.send_if_modified(|s| {
            if event.owner().is_some_and(|owner| s.user_id() != Some(owner)) {
                return false;
            }
            notice = snapshot::apply_change(&mut s.notifications, event);
            true
        });
        if !applied {
            debug!(kind = kind.as_str(), "dropping change for another user");
            return;
        }
        debug!(kind = kind.as_str(), "notification change applied");
        if let Some(message) = notice {
            self.services.notifier.success(&message);
        }
    }

    /// Make the feed subscription match the current user id.
    fn sync_feed(&self) -> Result<(), SessionError> {
        let mut slot = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        let user_id = self.state.borrow().user_id().map(str::to_owned);
        if slot.as_ref().map(FeedGuard::user_id) == user_id.as_deref() {
            return Ok(());
        }

        // Release before acquiring so a user never has two live channels.
        if let Some(old) = slot.take() {
            info!(channel = old.channel(), user_id = %old.user_id(), "change feed released");
        }
        let Some(user_id) = user_id else {
            self.record_feed_error(None);
            return Ok(());
        };

        let spec = FeedSpec::notifications_for(&self.config.notifications_table, &user_id);
        let channel = match self.services.feed.subscribe(spec) {
            Ok(channel) => channel,
            Err(e) => {
                let e = SessionError::from(e);
                self.record_feed_error(Some(e.to_string()));
                return Err(e);
            }
        };
        info!(channel = channel.id, user_id = %user_id, "change feed subscribed");
        let listener = self.runtime.spawn(listen_feed(self.self_ref.clone(), channel.events));
        *slot = Some(FeedGuard::new(Arc::clone(&self.services.feed), channel.id, user_id).with_listener(listener));
        self.record_feed_error(None);
        Ok(())
    }

    fn record_feed_error(&self, message: Option<String>) {
        *self.feed_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    /// Drop the feed guard if it belongs to a user other than `user_id`.
    fn release_feed_unless(&self, user_id: Option<&str>) {
        let mut slot = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|guard| Some(guard.user_id()) != user_id) {
            if let Some(old) = slot.take() {
                info!(channel = old.channel(), user_id = %old.user_id(), "change feed released");
            }
        }
    }

    fn release_feed(&self) {
        let released = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(released);
    }
}

// =============================================================================
// LISTENERS
// =============================================================================

async fn fetch_session_data(
    backend: &dyn Backend,
    user: &User,
) -> (Result<Option<Profile>, BackendError>, Result<Vec<Notification>, BackendError>) {
    tokio::join!(backend.current_profile(user), backend.notifications(user))
}

async fn listen_auth(coordinator: Weak<SessionCoordinator>, mut events: mpsc::UnboundedReceiver<AuthEvent>) {
    while let Some(event) = events.recv().await {
        let Some(this) = coordinator.upgrade() else {
            break;
        };
        // Fetches are detached; stale results are discarded by generation.
        this.handle_auth_event(event);
    }
    debug!("auth listener stopped");
}

async fn listen_feed(coordinator: Weak<SessionCoordinator>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
    while let Some(event) = events.recv().await {
        let Some(this) = coordinator.upgrade() else {
            break;
        };
        this.apply_change(event);
    }
    debug!("change feed listener stopped");
}
