//! Navigation and notice adapters for running without a UI.
//!
//! SYSTEM CONTEXT
//! ==============
//! The headless binary has no router or toast surface. Navigation is kept in
//! memory and notices go to the `tracing` log.

#[cfg(test)]
#[path = "headless_test.rs"]
mod tests;

use std::sync::{Mutex, PoisonError};

use url::Url;

use crate::services::{Navigator, Notifier};

/// In-memory router: tracks the active path and every `replace` target.
#[derive(Debug)]
pub struct MemoryNavigator {
    path: Mutex<String>,
    history: Mutex<Vec<Url>>,
}

impl MemoryNavigator {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: Mutex::new(path.into()), history: Mutex::new(Vec::new()) }
    }

    /// Simulate client-side navigation to `path`.
    pub fn visit(&self, path: impl Into<String>) {
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    /// Targets passed to `replace`, oldest first.
    #[must_use]
    pub fn replaced(&self) -> Vec<Url> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for MemoryNavigator {
    fn replace(&self, url: &Url) {
        tracing::info!(url = %url, "navigate (replace)");
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = url.path().to_owned();
    }

    fn current_path(&self) -> String {
        self.path.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Notices written to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        tracing::info!(notice = message, "notice");
    }

    fn error(&self, message: &str) {
        tracing::error!(notice = message, "notice");
    }
}
