//! Authenticated API requests with transparent access token refresh
//!
//! An [`AuthenticatedRequestExecutor`] attaches the session's current access
//! token to each outgoing request as a bearer credential. If the server
//! rejects the token with `401 Unauthorized` or `403 Forbidden`, the executor
//! refreshes it and retries the request exactly once. Requests that are
//! rejected concurrently share a single refresh.
//!
//! When the refresh itself fails, the session is over: the store is cleared,
//! the [`LoginNavigator`] is told to send the user back to log in, and the
//! request fails with [`RequestError::AuthenticationFailed`].
//!
//! For the common case of an API that keeps its refresh credential in a
//! session cookie, [`SessionClient`] wires everything together.
//!
//! ```
//! use serde::Deserialize;
//! use tessera_reqwest::{ApiConfig, RequestOptions, SessionClient};
//!
//! #[derive(Deserialize)]
//! struct Profile {
//!     email: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let config = ApiConfig::new("https://api.example.com".parse().unwrap());
//! let client = SessionClient::builder(config).build().unwrap();
//!
//! # async move {
//! let profile: Profile = client
//!     .execute("/api/profile", RequestOptions::get())
//!     .await
//!     .unwrap();
//! # let _ = profile.email;
//! # };
//! # }
//! ```
//!
//! Paths given as absolute URLs are sent as-is, but the access token is only
//! attached to requests under the configured base URL. A different
//! [`Predicate`](predicates::Predicate) over a [`RequestAttempt`] can be
//! supplied to widen or narrow that; see [`predicate`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use predicates::prelude::*;
//! use tessera_reqwest::{
//!     ApiConfig, AuthenticatedRequestExecutor, CookieAuthority, InMemorySessionStore,
//!     RefreshCoordinator, ReqwestTransport, RequestAttempt, TracingNavigator, WithinBaseUrl,
//! };
//!
//! let config = ApiConfig::new("https://api.example.com".parse().unwrap());
//! let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
//!
//! let coordinator = RefreshCoordinator::new(
//!     Arc::new(CookieAuthority::new(client.clone(), config.clone())),
//!     Arc::new(InMemorySessionStore::new()),
//! );
//!
//! let scope = WithinBaseUrl::new(&config)
//!     .or(predicate::function(|a: &RequestAttempt| {
//!         a.url().host_str() == Some("uploads.example.com")
//!     }));
//!
//! AuthenticatedRequestExecutor::new(
//!     config,
//!     Arc::new(ReqwestTransport::from(client)),
//!     coordinator,
//!     Arc::new(TracingNavigator),
//! )
//! .with_predicate(scope);
//! ```

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

mod attempt;
mod client;
mod error;
mod executor;
mod navigator;
pub mod predicate;
mod transport;

pub use attempt::{RequestAttempt, RequestOptions};
pub use client::{SessionClient, SessionClientBuilder};
pub use error::{RequestError, TransportError};
pub use executor::AuthenticatedRequestExecutor;
pub use navigator::{FnNavigator, LoginNavigator, TracingNavigator};
pub use predicate::WithinBaseUrl;
pub use transport::{ReqwestTransport, Transport, TransportOutcome};

pub use tessera_session::{
    AccessToken, AccessTokenRef, ApiConfig, AuthAuthority, CookieAuthority, Email, EmailRef,
    InMemorySessionStore, RefreshCoordinator, RefreshOutcome, Role, RoleRef, Session,
    SessionStore, UserProfile,
};
