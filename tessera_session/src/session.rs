//! Session state and the stores that hold it

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::{AccessToken, AccessTokenRef, Email, Role, RoleRef};

/// The profile of the user the current access token was issued to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    /// The user's identity
    pub email: Email,
    /// The user's role, if the authority reported one
    pub role: Option<Role>,
    /// The user's given name
    pub name: Option<String>,
    /// The user's family name
    pub surname: Option<String>,
}

impl UserProfile {
    /// Constructs a profile with only an identity
    pub fn new(email: Email) -> Self {
        Self {
            email,
            role: None,
            name: None,
            surname: None,
        }
    }

    /// Sets the user's role
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Sets the user's given and family names
    pub fn with_names(mut self, name: impl Into<String>, surname: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.surname = Some(surname.into());
        self
    }

    /// A human readable name, falling back to the email address
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.name.as_deref(), self.surname.as_deref()]
            .iter()
            .flatten()
            .copied()
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            self.email.as_str().to_owned()
        } else {
            parts.join(" ")
        }
    }
}

/// The credential and identity of the current user
///
/// A session never holds a user without also holding an access token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    access_token: Option<AccessToken>,
    user: Option<UserProfile>,
}

impl Session {
    /// An unauthenticated session
    pub const fn empty() -> Self {
        Self {
            access_token: None,
            user: None,
        }
    }

    /// The current access token, if any
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// The authenticated user, if known
    #[inline]
    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Whether an access token is held
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// The authenticated user's role, if known
    #[inline]
    pub fn user_role(&self) -> Option<&RoleRef> {
        self.user.as_ref()?.role.as_deref()
    }
}

/// The single point through which session state is read and written
///
/// Every write leaves the store in a state where a user is only present
/// alongside an access token.
pub trait SessionStore: fmt::Debug + Send + Sync {
    /// A consistent view of the session at this instant
    fn snapshot(&self) -> Arc<Session>;

    /// Replaces the access token, keeping any known user
    fn set_access_token(&self, token: AccessToken);

    /// Replaces the user profile
    ///
    /// Returns `false`, leaving the session unchanged, if no access token
    /// is held.
    fn set_user(&self, user: UserProfile) -> bool;

    /// Sets the access token and, when provided, the user profile in a single update
    ///
    /// When `user` is `None`, any previously known user is retained.
    fn establish(&self, token: AccessToken, user: Option<UserProfile>);

    /// Removes the access token, the user, and any published role marker
    fn clear_auth(&self);

    /// The current access token, if any
    fn access_token(&self) -> Option<AccessToken> {
        self.snapshot().access_token().map(ToOwned::to_owned)
    }

    /// The authenticated user, if known
    fn user(&self) -> Option<UserProfile> {
        self.snapshot().user().cloned()
    }

    /// Whether an access token is held
    fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    /// The authenticated user's role, if known
    fn user_role(&self) -> Option<Role> {
        self.snapshot().user_role().map(ToOwned::to_owned)
    }
}

/// An externally visible record of the current user's role
///
/// Route guards outside this crate read the marker to decide where a user
/// may navigate, so it must track the session store.
pub trait RoleMarker: fmt::Debug + Send + Sync {
    /// Publishes the current role, or its absence
    fn mark(&self, role: Option<&RoleRef>);
}

/// A role marker that can be shared with readers in the same process
#[derive(Clone, Debug, Default)]
pub struct SharedRoleMarker {
    role: Arc<ArcSwapOption<Role>>,
}

impl SharedRoleMarker {
    /// Constructs an empty role marker
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published role
    pub fn get(&self) -> Option<Role> {
        self.role.load_full().map(|r| (*r).clone())
    }
}

impl RoleMarker for SharedRoleMarker {
    fn mark(&self, role: Option<&RoleRef>) {
        self.role.store(role.map(|r| Arc::new(r.to_owned())));
    }
}

/// A session store held in process memory
///
/// Writes are serialized, and each one publishes the role of the session it
/// installed before the next write begins, so the role marker always ends up
/// agreeing with the stored session.
#[derive(Debug)]
pub struct InMemorySessionStore {
    session: ArcSwap<Session>,
    writes: Mutex<()>,
    role_marker: Option<Arc<dyn RoleMarker>>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Constructs a store holding an empty session
    pub fn new() -> Self {
        Self {
            session: ArcSwap::from_pointee(Session::empty()),
            writes: Mutex::new(()),
            role_marker: None,
        }
    }

    /// Publishes the user's role to `marker` whenever the session changes
    pub fn with_role_marker(mut self, marker: impl RoleMarker + 'static) -> Self {
        self.role_marker = Some(Arc::new(marker));
        self
    }

    /// Replaces the session with the one `update` derives from the current one
    ///
    /// Returns `false` without writing if `update` declines.
    fn write<F>(&self, publish_role: bool, update: F) -> bool
    where
        F: FnOnce(&Session) -> Option<Session>,
    {
        let _write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

        let next = match update(&self.session.load()) {
            Some(next) => Arc::new(next),
            None => return false,
        };
        self.session.store(Arc::clone(&next));

        if publish_role {
            if let Some(marker) = &self.role_marker {
                marker.mark(next.user_role());
            }
        }

        true
    }
}

impl SessionStore for InMemorySessionStore {
    fn snapshot(&self) -> Arc<Session> {
        self.session.load_full()
    }

    fn set_access_token(&self, token: AccessToken) {
        self.write(false, |current| {
            Some(Session {
                access_token: Some(token),
                user: current.user.clone(),
            })
        });
        tracing::trace!("stored access token");
    }

    fn set_user(&self, user: UserProfile) -> bool {
        let stored = self.write(true, |current| {
            current.access_token.as_ref().map(|token| Session {
                access_token: Some(token.clone()),
                user: Some(user),
            })
        });

        if !stored {
            tracing::warn!("ignoring user profile for a session without an access token");
        }
        stored
    }

    fn establish(&self, token: AccessToken, user: Option<UserProfile>) {
        self.write(true, |current| {
            Some(Session {
                access_token: Some(token),
                user: user.or_else(|| current.user.clone()),
            })
        });
        tracing::trace!("established session");
    }

    fn clear_auth(&self) {
        self.write(true, |_| Some(Session::empty()));
        tracing::debug!("cleared session");
    }
}
