//! DTOs for interacting with the session authority

use serde::{Deserialize, Serialize};

use crate::{authority::RefreshGrant, AccessToken, Email, EmailRef, Role, UserProfile};

/// The flat body returned by the refresh endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    #[serde(default)]
    pub email: Option<Email>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

impl RefreshResponse {
    /// Splits the response into a grant, or `None` if no usable token was issued
    ///
    /// A user profile is only reported when the response identifies the user.
    pub fn into_grant(self) -> Option<RefreshGrant> {
        let access_token = self.access_token.filter(|t| !t.as_str().is_empty())?;

        let user = self
            .email
            .filter(|e| !e.as_str().is_empty())
            .map(|email| UserProfile {
                email,
                role: self.role,
                name: self.name,
                surname: self.surname,
            });

        Some(RefreshGrant { access_token, user })
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ResendVerificationRequest<'a> {
    pub email: &'a EmailRef,
}
