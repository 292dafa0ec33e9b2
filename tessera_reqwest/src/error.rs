use reqwest::StatusCode;
use thiserror::Error;

/// A failed transport call
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server responded with a non-success status
    #[error("server responded with status {status}")]
    Status {
        /// The status returned by the server
        status: StatusCode,
        /// The body of the error response
        body: String,
    },
    /// Unable to send the request
    #[error("error sending request")]
    Send(#[source] reqwest_middleware::Error),
    /// Unable to read the response body
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
}

impl TransportError {
    /// The status returned by the server, if a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Send(_) | Self::BodyRead(_) => None,
        }
    }

    /// The body of the error response, if a response was received
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            Self::Send(_) | Self::BodyRead(_) => None,
        }
    }
}

/// An error returned to the caller of an authenticated request
#[derive(Debug, Error)]
pub enum RequestError {
    /// The access token was rejected and could not be refreshed
    ///
    /// The session has been cleared and the user sent to log in again.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// The request failed again after the access token was refreshed
    ///
    /// The credential is known to be fresh, so this is an ordinary
    /// application error rather than an authentication problem.
    #[error("request failed after refreshing credentials")]
    RetryFailed(#[source] TransportError),
    /// The request failed for a reason unrelated to authentication
    #[error(transparent)]
    Transport(TransportError),
    /// The request path could not be resolved to a URL
    #[error("invalid request URL")]
    InvalidUrl(#[from] url::ParseError),
    /// The response body could not be decoded
    #[error("error decoding response body")]
    Decode(#[source] serde_json::Error),
}

impl RequestError {
    /// The HTTP status behind this error, if the server responded
    pub fn status(&self) -> Option<StatusCode> {
        self.transport_error().and_then(TransportError::status)
    }

    /// The transport failure behind this error, if any
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::RetryFailed(error) | Self::Transport(error) => Some(error),
            Self::AuthenticationFailed | Self::InvalidUrl(_) | Self::Decode(_) => None,
        }
    }

    /// Whether this error ended the session
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}
