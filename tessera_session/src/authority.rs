//! Authorities able to exchange an ambient credential for an access token

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::{AccessToken, UserProfile};

pub mod cookie;

pub use cookie::{CookieAuthority, VerificationError};

/// The result of a successful refresh
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshGrant {
    /// The newly issued access token
    pub access_token: AccessToken,
    /// The user the token was issued to, when the authority reports one
    pub user: Option<UserProfile>,
}

/// An asynchronous source of fresh access tokens
#[async_trait]
pub trait AuthAuthority: fmt::Debug + Send + Sync {
    /// Exchanges the ambient credential for a new access token
    async fn refresh(&self) -> Result<RefreshGrant, AuthorityError>;

    /// Ends the server-side session backing the ambient credential
    ///
    /// Authorities without a server-side session have nothing to do.
    async fn logout(&self) -> Result<(), AuthorityError> {
        Ok(())
    }
}

/// An error while communicating with the authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The authority responded with an error status
    #[error("authority rejected the request with status {status}: {body}")]
    Rejected {
        /// The status returned by the authority
        status: reqwest::StatusCode,
        /// The body of the error
        body: String,
    },
    /// The authority responded successfully but did not issue an access token
    #[error("authority response did not include an access token")]
    MissingAccessToken,
    /// Unable to deserialize the response body
    #[error("error deserializing response body from authority")]
    BodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// The endpoint URL could not be constructed
    #[error("invalid authority endpoint")]
    InvalidEndpoint(#[from] url::ParseError),
}
