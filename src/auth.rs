//! Email/password login against the local user roster.
//!
//! Deliberately not cryptographically secure: passwords are stored and
//! compared in plain text, mirroring the roster that round-trips through
//! the remote backup. Email matching is case-insensitive (lowercased at
//! the boundary); password matching is exact. The session is kept
//! in-memory only and does not survive a restart.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{normalize_email, Role, User};

/// Login failure kinds, surfaced as inline form messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,
    #[error("Incorrect password")]
    InvalidCredentials,
}

/// The built-in admin account. Kept valid for login even when a failed
/// sync has emptied the roster, so the shop can never be locked out.
pub fn default_admin() -> User {
    User {
        email: "admin@siddhivinayak.com".to_string(),
        name: "System Admin".to_string(),
        role: Role::Admin,
        password: "admin123".to_string(),
    }
}

/// Validate a submitted email/password pair against the roster.
///
/// Returns the full matched `User` record; the caller holds it as the
/// session identity. When no roster row matches the email, the built-in
/// admin is still accepted as a lockout fallback.
pub fn authenticate(email: &str, password: &str, users: &[User]) -> Result<User, AuthError> {
    let needle = normalize_email(email);

    let matched = users
        .iter()
        .find(|u| normalize_email(&u.email) == needle)
        .cloned()
        .or_else(|| {
            let fallback = default_admin();
            (needle == normalize_email(&fallback.email)).then_some(fallback)
        });

    let user = matched.ok_or(AuthError::UserNotFound)?;
    if user.password != password {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user)
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// The authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub user: User,
    pub login_time: DateTime<Utc>,
}

/// In-memory holder for the current session.
pub struct SessionState {
    current: Mutex<Option<Session>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Authenticate and, on success, install the user as the current
    /// session. A second login replaces the previous session.
    pub fn login(&self, email: &str, password: &str, users: &[User]) -> Result<User, AuthError> {
        let user = match authenticate(email, password, users) {
            Ok(u) => u,
            Err(e) => {
                warn!(email = %normalize_email(email), error = %e, "login rejected");
                return Err(e);
            }
        };

        let session = Session {
            session_id: Uuid::new_v4(),
            user: user.clone(),
            login_time: Utc::now(),
        };
        info!(session_id = %session.session_id, email = %user.email, role = user.role.as_str(), "login successful");

        let mut current = self.current.lock().unwrap();
        *current = Some(session);
        Ok(user)
    }

    /// Drop the current session, if any.
    pub fn logout(&self) {
        let mut current = self.current.lock().unwrap();
        if let Some(session) = current.take() {
            info!(session_id = %session.session_id, "session logged out");
        }
    }

    /// The currently authenticated user, if anyone is signed in.
    pub fn current_user(&self) -> Option<User> {
        let current = self.current.lock().unwrap();
        current.as_ref().map(|s| s.user.clone())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
