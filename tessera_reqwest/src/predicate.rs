//! Deciding which requests may carry the access token
//!
//! Request paths that are already absolute URLs are sent as given, so a
//! caller can reach hosts other than the API. The access token must not
//! follow them there. By default the executor only attaches it to requests
//! that stay within the API's base URL.
//!
//! Any [`Predicate`] over a [`RequestAttempt`] can be used in its place, and
//! predicates compose:
//!
//! ```
//! use predicates::prelude::*;
//! use tessera_reqwest::{ApiConfig, RequestAttempt, WithinBaseUrl};
//!
//! let config = ApiConfig::new("https://api.example.com/v1".parse().unwrap());
//! let predicate = WithinBaseUrl::new(&config)
//!     .and(predicate::function(|a: &RequestAttempt| a.url().scheme() == "https"));
//! # let _ = predicate;
//! ```

use std::fmt;

use predicates::{reflection, Predicate};
use tessera_session::ApiConfig;
use url::Url;

use crate::RequestAttempt;

/// Only attach the access token to requests under the API's base URL
///
/// A request is under the base URL when it has the same origin (scheme,
/// host and port) and its path is the base path or lies beneath it. With a
/// base of `https://api.example.com/v1`, `/v1/profile` qualifies but
/// `/v10/profile` does not.
#[derive(Clone, Debug)]
pub struct WithinBaseUrl {
    base: Url,
}

impl WithinBaseUrl {
    /// Scopes the access token to the base URL of `config`
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            base: config.base_url().clone(),
        }
    }

    fn base_path(&self) -> &str {
        self.base.path().trim_end_matches('/')
    }
}

impl Predicate<RequestAttempt> for WithinBaseUrl {
    fn eval(&self, attempt: &RequestAttempt) -> bool {
        let url = attempt.url();
        if url.origin() != self.base.origin() {
            return false;
        }

        let base = self.base_path();
        match url.path().strip_prefix(base) {
            Some(rest) => base.is_empty() || rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn find_case(&self, expected: bool, attempt: &RequestAttempt) -> Option<reflection::Case> {
        let result = self.eval(attempt);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result)
                    .add_product(reflection::Product::new("url", attempt.url().to_string())),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for WithinBaseUrl {}
impl fmt::Display for WithinBaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "url within {}", self.base)
    }
}
