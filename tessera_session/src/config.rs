//! Configuration for locating the API server

use std::env;

use thiserror::Error;
use url::Url;

/// Location of the API server that issues and accepts access tokens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    base_url: Url,
}

/// An error while loading the API configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment variable holding the base URL was not set
    #[error("environment variable {0} is not set")]
    MissingVariable(&'static str),
    /// The base URL could not be parsed
    #[error("invalid API base URL")]
    InvalidBaseUrl(#[from] url::ParseError),
}

impl ApiConfig {
    /// The environment variable consulted by [`from_env()`][Self::from_env()]
    pub const BASE_URL_ENV: &'static str = "API_BASE_URL";

    /// Constructs a configuration from a base URL
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// Loads the base URL from the `API_BASE_URL` environment variable
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::var(Self::BASE_URL_ENV)
            .map_err(|_| ConfigError::MissingVariable(Self::BASE_URL_ENV))?;
        Ok(Self::new(Url::parse(&raw)?))
    }

    /// The configured base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a request path against the base URL
    ///
    /// Paths that already name a scheme (anything starting with `http`) are
    /// used as given. Any other path is appended to the base URL verbatim,
    /// so a base URL with a path prefix keeps that prefix.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        if path.starts_with("http") {
            return Url::parse(path);
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            Url::parse(&format!("{}{}", base, path))
        } else {
            Url::parse(&format!("{}/{}", base, path))
        }
    }
}
