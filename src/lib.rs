//! Session state coordination for a signed-in client.
//!
//! SYSTEM CONTEXT
//! ==============
//! A client app needs one consistent view of "who is signed in": the user,
//! their profile, their notifications and the UI view. This crate keeps that
//! snapshot in sync with a hosted auth provider, a REST backend and a realtime
//! change feed, and exposes it to consumers through a scoped read surface.
//!
//! ARCHITECTURE
//! ============
//! - [`coordinator`]: provider scope, context handle, transitions, sign-out
//! - [`snapshot`]: snapshot value and its pure reducer
//! - [`services`]: adapter traits and RAII subscription guards
//! - [`http`] / [`realtime`]: network adapters for the hosted provider
//! - [`headless`]: navigator and notifier for running without a UI

pub mod config;
pub mod coordinator;
pub mod error;
pub mod headless;
pub mod http;
pub mod realtime;
pub mod redirect;
pub mod services;
pub mod snapshot;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use coordinator::{SessionContext, SessionCoordinator, SessionProvider};
pub use error::{ErrorCode, SessionError};
pub use snapshot::{Action, Snapshot};
