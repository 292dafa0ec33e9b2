//! An authority that relies on a server-side session cookie

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::{AuthAuthority, AuthorityError, RefreshGrant};
use crate::{ApiConfig, EmailRef};

mod dto;

const REFRESH_PATH: &str = "/api/auth/refresh";
const LOGOUT_PATH: &str = "/api/auth/logout";
const RESEND_VERIFICATION_PATH: &str = "/api/auth/resend-verification";

/// An authority that exchanges a session cookie for access tokens
///
/// The `client` must carry the session cookie on every request, which in
/// practice means it should be built with a cookie store that is shared
/// with whatever client performed the login.
#[derive(Clone, Debug)]
pub struct CookieAuthority {
    client: reqwest::Client,
    config: ApiConfig,
    refresh_path: String,
    logout_path: String,
    resend_verification_path: String,
}

impl CookieAuthority {
    /// Constructs a new authority using the default endpoint paths
    pub fn new(client: reqwest::Client, config: ApiConfig) -> Self {
        Self {
            client,
            config,
            refresh_path: REFRESH_PATH.to_owned(),
            logout_path: LOGOUT_PATH.to_owned(),
            resend_verification_path: RESEND_VERIFICATION_PATH.to_owned(),
        }
    }

    /// Overrides the path of the refresh endpoint
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Overrides the path of the logout endpoint
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// Overrides the path of the resend verification endpoint
    pub fn with_resend_verification_path(mut self, path: impl Into<String>) -> Self {
        self.resend_verification_path = path.into();
        self
    }

    /// Asks the authority to send another verification email to `email`
    ///
    /// Failures are reported without detail so that callers cannot learn
    /// whether an account exists for the address.
    pub async fn resend_verification(&self, email: &EmailRef) -> Result<(), VerificationError> {
        if email.as_str().trim().is_empty() {
            return Err(VerificationError::EmailRequired);
        }

        let url = self
            .config
            .resolve(&self.resend_verification_path)
            .map_err(|e| VerificationError::Unavailable(e.into()))?;
        let req = self
            .client
            .post(url)
            .json(&dto::ResendVerificationRequest { email });

        match send(req).await {
            Ok(_) => {
                tracing::info!("verification email requested");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to request verification email"
                );
                Err(VerificationError::Unavailable(error))
            }
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthorityError> {
        Ok(self.config.resolve(path)?)
    }

    #[tracing::instrument(err, skip(self), fields(refresh_path = %self.refresh_path))]
    async fn request_refresh(&self) -> Result<RefreshGrant, AuthorityError> {
        tracing::trace!("requesting token from authority");

        let url = self.endpoint(&self.refresh_path)?;
        let body = send(self.client.post(url)).await?;

        let resp: dto::RefreshResponse = serde_json::from_slice(&body)?;
        let grant = resp
            .into_grant()
            .ok_or(AuthorityError::MissingAccessToken)?;

        tracing::info!(has_user = grant.user.is_some(), "received new access token");

        Ok(grant)
    }

    #[tracing::instrument(err, skip(self), fields(logout_path = %self.logout_path))]
    async fn request_logout(&self) -> Result<(), AuthorityError> {
        let url = self.endpoint(&self.logout_path)?;
        send(self.client.post(url)).await?;

        tracing::info!("server session ended");
        Ok(())
    }
}

#[async_trait]
impl AuthAuthority for CookieAuthority {
    async fn refresh(&self) -> Result<RefreshGrant, AuthorityError> {
        self.request_refresh().await
    }

    async fn logout(&self) -> Result<(), AuthorityError> {
        self.request_logout().await
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<bytes::Bytes, AuthorityError> {
    let resp = req.send().await.map_err(AuthorityError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received response from authority"
    );

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.map_err(AuthorityError::BodyReadError)?;
        return Err(AuthorityError::Rejected { status, body });
    }

    resp.bytes().await.map_err(AuthorityError::BodyReadError)
}

/// An error while requesting a verification email
#[derive(Debug, Error)]
pub enum VerificationError {
    /// No email address was provided
    #[error("email address is required")]
    EmailRequired,
    /// The request could not be completed
    #[error("failed to send verification email, please try again later")]
    Unavailable(#[source] AuthorityError),
}
