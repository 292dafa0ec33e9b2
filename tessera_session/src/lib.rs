//! Client-side session state with single-flight access token refresh
//!
//! This library holds the credential a client presents to an API server and
//! keeps it fresh. The access token and the profile of the user it was issued
//! to live in a [`SessionStore`]. When the server stops accepting the token,
//! a [`RefreshCoordinator`] exchanges an ambient long-lived credential, such
//! as a session cookie, for a new one.
//!
//! The coordinator guarantees that only one refresh is in flight at a time.
//! Any number of requests may discover that the token has been rejected at
//! the same moment; the first to ask starts the refresh, and the others
//! wait for it and share its outcome. Once that refresh settles, the next
//! caller to ask starts a fresh one rather than observing a stale result.
//!
//! ```
//! use std::sync::Arc;
//!
//! use tessera_session::{
//!     ApiConfig, CookieAuthority, InMemorySessionStore, RefreshCoordinator, SessionStore,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let config = ApiConfig::new("https://api.example.com".parse().unwrap());
//! let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
//!
//! let store = Arc::new(InMemorySessionStore::new());
//! let authority = Arc::new(CookieAuthority::new(client, config));
//! let coordinator = RefreshCoordinator::new(authority, store.clone());
//!
//! # async move {
//! if coordinator.refresh().await {
//!     tracing::info!(authenticated = store.is_authenticated(), "session refreshed");
//! }
//! # };
//! # }
//! ```
//!
//! The coordinator only reports whether a refresh succeeded. Deciding what
//! to do about a failed refresh, such as clearing the session and sending the
//! user back to a login page, is left to the caller; `tessera_reqwest` makes
//! that decision for outbound HTTP requests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authority;
mod braids;
pub mod config;
mod coordinator;
pub mod session;

pub use authority::{
    AuthAuthority, AuthorityError, CookieAuthority, RefreshGrant, VerificationError,
};
pub use braids::*;
pub use config::{ApiConfig, ConfigError};
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use session::{
    InMemorySessionStore, RoleMarker, Session, SessionStore, SharedRoleMarker, UserProfile,
};
