//! Domain records shared by the coordinator and the service adapters.
//!
//! DESIGN
//! ======
//! These types mirror the hosted backend's JSON rows and auth payloads so
//! serde round-trips stay lossless. Identifiers are kept as strings exactly as
//! the provider issues them; nothing here interprets them beyond emptiness.

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTITY
// =============================================================================

/// An authenticated identity as issued by the auth provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Provider-issued user identifier (UUID string).
    pub id: String,
    /// Primary email address, if the provider exposes one.
    #[serde(default)]
    pub email: Option<String>,
    /// Audience/role string attached by the provider.
    #[serde(default)]
    pub role: Option<String>,
    /// ISO 8601 timestamp of the last sign-in.
    #[serde(default)]
    pub last_sign_in_at: Option<String>,
}

impl User {
    /// Whether this user carries a non-empty identity.
    #[must_use]
    pub fn has_identity(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// An active auth session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token used for backend and realtime calls.
    pub access_token: String,
    /// The signed-in user.
    pub user: User,
}

/// Application-level profile row keyed by user identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Same identifier as the owning [`User`].
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Remaining backend columns, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// A user-facing notification record owned by the signed-in user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique record identifier.
    pub id: String,
    /// Originating user, if any.
    #[serde(default)]
    pub from: Option<String>,
    /// Owner user id.
    pub to: String,
    /// Collection/table the notification refers to.
    #[serde(default)]
    pub collection: Option<String>,
    /// Notification category (serialized as `type`).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Human-readable text shown in notices.
    #[serde(default)]
    pub message: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Optional in-app link.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub viewed: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Opaque UI selection value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct View(pub String);

impl From<&str> for View {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Kind of auth-state transition reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChange {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One auth-state-change notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub change: AuthChange,
    /// `None` when the provider reports no active session.
    pub session: Option<Session>,
}

impl AuthEvent {
    #[must_use]
    pub fn signed_in(session: Session) -> Self {
        Self { change: AuthChange::SignedIn, session: Some(session) }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self { change: AuthChange::SignedOut, session: None }
    }
}

/// Row-level event kinds delivered by the change feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A decoded change-feed event for the notifications table.
///
/// Insert and update carry the new row; delete carries only the old row's id.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    Insert(Notification),
    Update(Notification),
    Delete { id: String },
}

impl ChangeEvent {
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Owner (`to`) of the carried record. Deletes only carry the id.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Insert(record) | Self::Update(record) => Some(&record.to),
            Self::Delete { .. } => None,
        }
    }
}
