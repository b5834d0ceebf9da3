use std::sync::Arc;

use session_sync::config::{ApiConfig, SessionConfig};
use session_sync::headless::{MemoryNavigator, TracingNotifier};
use session_sync::http::{HttpAuth, HttpBackend};
use session_sync::realtime::RealtimeFeed;
use session_sync::services::Services;
use session_sync::{Snapshot, SessionProvider};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let session_config = SessionConfig::from_env().expect("invalid session config");
    let api_config = ApiConfig::from_env().expect("invalid API config");
    let start_path = std::env::var("START_PATH").unwrap_or_else(|_| "/".into());

    let auth = Arc::new(HttpAuth::new(api_config.clone()).expect("auth client init failed"));
    let backend = HttpBackend::new(api_config.clone(), auth.clone())
        .expect("backend client init failed")
        .with_notifications_table(session_config.notifications_table.clone());
    let feed = RealtimeFeed::spawn(&api_config, auth.clone()).expect("realtime feed init failed");

    let services = Services {
        auth: auth.clone(),
        feed: Arc::new(feed),
        backend: Arc::new(backend),
        navigator: Arc::new(MemoryNavigator::new(start_path)),
        notifier: Arc::new(TracingNotifier),
    };
    let provider = SessionProvider::mount(services, session_config, Snapshot::default());
    let mut snapshots = provider.context().watch().expect("provider is mounted");

    if let Err(e) = auth.restore().await {
        tracing::error!(error = %e, "session restore failed");
    }

    tracing::info!("session-sync running");
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                tracing::info!(
                    loading = snapshot.loading,
                    authenticated = snapshot.authenticated,
                    user = snapshot.user_id().unwrap_or_default(),
                    notifications = snapshot.notifications.len(),
                    error = snapshot.error.as_deref().unwrap_or_default(),
                    "session snapshot"
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("session-sync shutting down");
    drop(provider);
}
