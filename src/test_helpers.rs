//! In-memory fakes for every consumed service plus record builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use url::Url;

use crate::config::SessionConfig;
use crate::coordinator::SessionProvider;
use crate::error::{AuthError, BackendError, FeedError};
use crate::headless::MemoryNavigator;
use crate::services::{
    AuthListeners, AuthProvider, AuthSubscription, Backend, ChangeFeed, FeedChannel, FeedSpec, Notifier, Services,
    SubscriptionId,
};
use crate::snapshot::Snapshot;
use crate::types::{AuthEvent, ChangeEvent, Notification, Profile, Session, User};

// =============================================================================
// BUILDERS
// =============================================================================

pub(crate) fn user(id: &str) -> User {
    User { id: id.into(), email: Some(format!("{id}@example.com")), ..User::default() }
}

pub(crate) fn session(id: &str) -> Session {
    Session { access_token: format!("token-{id}"), user: user(id) }
}

pub(crate) fn profile(id: &str) -> Profile {
    Profile { id: id.into(), username: Some(format!("name-{id}")), ..Profile::default() }
}

pub(crate) fn notification(id: &str, to: &str, message: &str) -> Notification {
    Notification {
        id: id.into(),
        from: None,
        to: to.into(),
        collection: Some("posts".into()),
        kind: Some("comment".into()),
        message: message.into(),
        data: serde_json::Value::Null,
        link: None,
        viewed: false,
        created_at: None,
        updated_at: None,
    }
}

// =============================================================================
// AUTH
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeAuth {
    listeners: AuthListeners,
    sign_out_calls: AtomicUsize,
    fail_sign_out: AtomicBool,
}

impl FakeAuth {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn emit(&self, event: &AuthEvent) {
        self.listeners.emit(event);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AuthProvider for FakeAuth {
    fn on_auth_state_change(&self) -> AuthSubscription {
        self.listeners.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(id);
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Status { status: 503, body: "unavailable".into() });
        }
        Ok(())
    }
}

// =============================================================================
// CHANGE FEED
// =============================================================================

struct OpenChannel {
    id: SubscriptionId,
    spec: FeedSpec,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
pub(crate) struct FakeFeed {
    next_id: AtomicU64,
    channels: Mutex<Vec<OpenChannel>>,
    removed: Mutex<Vec<SubscriptionId>>,
    closed: AtomicBool,
}

impl FakeFeed {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open_channels(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub(crate) fn open_specs(&self) -> Vec<FeedSpec> {
        self.channels.lock().unwrap().iter().map(|c| c.spec.clone()).collect()
    }

    pub(crate) fn removed(&self) -> Vec<SubscriptionId> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Deliver `event` to every open channel; returns how many received it.
    pub(crate) fn push(&self, event: &ChangeEvent) -> usize {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tx.send(event.clone()).is_ok())
            .count()
    }
}

impl ChangeFeed for FakeFeed {
    fn subscribe(&self, spec: FeedSpec) -> Result<FeedChannel, FeedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FeedError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().unwrap().push(OpenChannel { id, spec, tx });
        Ok(FeedChannel { id, events: rx })
    }

    fn remove_channel(&self, id: SubscriptionId) {
        let mut channels = self.channels.lock().unwrap();
        let before = channels.len();
        channels.retain(|c| c.id != id);
        if channels.len() != before {
            self.removed.lock().unwrap().push(id);
        }
    }
}

// =============================================================================
// BACKEND
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeBackend {
    profiles: Mutex<HashMap<String, Profile>>,
    notifications: Mutex<HashMap<String, Vec<Notification>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    profile_calls: AtomicUsize,
    notification_calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_profile(&self, profile: Profile) {
        self.profiles.lock().unwrap().insert(profile.id.clone(), profile);
    }

    pub(crate) fn with_notifications(&self, user_id: &str, list: Vec<Notification>) {
        self.notifications.lock().unwrap().insert(user_id.into(), list);
    }

    pub(crate) fn fail_fetches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block profile fetches for `user_id` until the returned gate is notified.
    pub(crate) fn hold(&self, user_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(user_id.into(), Arc::clone(&gate));
        gate
    }

    pub(crate) fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn notification_calls(&self) -> usize {
        self.notification_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Backend for FakeBackend {
    async fn current_profile(&self, user: &User) -> Result<Option<Profile>, BackendError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().get(&user.id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Status { status: 500, body: "boom".into() });
        }
        Ok(self.profiles.lock().unwrap().get(&user.id).cloned())
    }

    async fn notifications(&self, user: &User) -> Result<Vec<Notification>, BackendError> {
        self.notification_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Request("connection reset".into()));
        }
        Ok(self
            .notifications
            .lock()
            .unwrap()
            .get(&user.id)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// NOTICES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Notice {
    Success(String),
    Error(String),
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.notices.lock().unwrap().push(Notice::Success(message.into()));
    }

    fn error(&self, message: &str) {
        self.notices.lock().unwrap().push(Notice::Error(message.into()));
    }
}

// =============================================================================
// HARNESS
// =============================================================================

pub(crate) const SITE: &str = "https://app.example.com";

pub(crate) struct Harness {
    pub(crate) auth: Arc<FakeAuth>,
    pub(crate) feed: Arc<FakeFeed>,
    pub(crate) backend: Arc<FakeBackend>,
    pub(crate) navigator: Arc<MemoryNavigator>,
    pub(crate) notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            auth: Arc::new(FakeAuth::new()),
            feed: Arc::new(FakeFeed::new()),
            backend: Arc::new(FakeBackend::new()),
            navigator: Arc::new(MemoryNavigator::new("/")),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub(crate) fn services(&self) -> Services {
        Services {
            auth: self.auth.clone(),
            feed: self.feed.clone(),
            backend: self.backend.clone(),
            navigator: self.navigator.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub(crate) fn config() -> SessionConfig {
        SessionConfig::new(Url::parse(SITE).unwrap())
    }

    pub(crate) fn mount(&self) -> SessionProvider {
        self.mount_with(Snapshot::default())
    }

    pub(crate) fn mount_with(&self, seed: Snapshot) -> SessionProvider {
        SessionProvider::mount(self.services(), Self::config(), seed)
    }
}

/// Wait (bounded) until the provider's snapshot satisfies `pred`.
pub(crate) async fn settle(provider: &SessionProvider, pred: impl FnMut(&Snapshot) -> bool) -> Snapshot {
    let mut rx = provider.coordinator().watch();
    let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("snapshot did not settle in time")
        .expect("snapshot sender dropped")
        .clone();
    snapshot
}

/// Let spawned tasks run.
pub(crate) async fn drain() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
