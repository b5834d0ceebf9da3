//! Session snapshot and its reducer.
//!
//! DESIGN
//! ======
//! The snapshot is a plain value. Every mutation is an [`Action`] applied by
//! [`reduce`]; each variant overwrites exactly one field (plus the derived
//! `authenticated` flag for [`Action::SetUser`]). There is no deep merge.
//!
//! Change-feed events patch the notification list through
//! [`apply_change`], which keeps `id` unique within the sequence.

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;

use serde::Serialize;

use crate::types::{ChangeEvent, Notification, Profile, User, View};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// The single authoritative record of session/auth/notification state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    /// True until the first auth resolution completes.
    pub loading: bool,
    /// Derived: true iff `user` has a non-empty identity.
    pub authenticated: bool,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    /// Last error message; cleared on success paths.
    pub error: Option<String>,
    pub view: View,
    pub notifications: Vec<Notification>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            loading: true,
            authenticated: false,
            user: None,
            profile: None,
            error: None,
            view: View::default(),
            notifications: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Build the seed snapshot from server-rendered defaults.
    #[must_use]
    pub fn seeded(user: Option<User>, profile: Option<Profile>) -> Self {
        Self::default()
            .reduce(Action::SetUser(user))
            .reduce(Action::SetProfile(profile))
    }

    /// Apply one action in place.
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SetLoading(loading) => self.loading = loading,
            Action::SetError(error) => self.error = error,
            Action::SetProfile(profile) => self.profile = profile,
            Action::SetView(view) => self.view = view,
            Action::SetNotifications(notifications) => self.notifications = notifications,
            Action::SetUser(user) => {
                self.authenticated = user.as_ref().is_some_and(User::has_identity);
                self.user = user;
            }
        }
    }

    /// Consume the snapshot and return it with `action` applied.
    #[must_use]
    pub fn reduce(mut self, action: Action) -> Self {
        self.apply(action);
        self
    }

    /// Current user id, if the snapshot is authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().filter(|u| u.has_identity()).map(|u| u.id.as_str())
    }
}

/// Pure reducer: `snapshot` with the field addressed by `action` replaced.
#[must_use]
pub fn reduce(snapshot: &Snapshot, action: Action) -> Snapshot {
    snapshot.clone().reduce(action)
}

// =============================================================================
// ACTIONS
// =============================================================================

/// One field replacement. Closed set; matched exhaustively by the reducer.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    SetLoading(bool),
    SetError(Option<String>),
    SetProfile(Option<Profile>),
    SetView(View),
    SetNotifications(Vec<Notification>),
    /// Replaces `user` and re-derives `authenticated` in the same step.
    SetUser(Option<User>),
}

// =============================================================================
// CHANGE-FEED PATCHING
// =============================================================================

/// Patch `notifications` with one change-feed event.
///
/// Returns the message to surface as a notice: the record's message for an
/// insert, or for an update that matched an existing id. Deletes and
/// unmatched updates return `None`.
pub fn apply_change(notifications: &mut Vec<Notification>, event: ChangeEvent) -> Option<String> {
    match event {
        ChangeEvent::Insert(record) => {
            notifications.retain(|n| n.id != record.id);
            let message = record.message.clone();
            notifications.push(record);
            Some(message)
        }
        ChangeEvent::Update(record) => {
            let slot = notifications.iter_mut().find(|n| n.id == record.id)?;
            let message = record.message.clone();
            *slot = record;
            Some(message)
        }
        ChangeEvent::Delete { id } => {
            notifications.retain(|n| n.id != id);
            None
        }
    }
}
