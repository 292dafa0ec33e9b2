//! The boundary between the executor and the network

use std::{error, fmt};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;

use crate::{RequestAttempt, TransportError};

/// The classified result of a single transport call
#[derive(Debug)]
pub enum TransportOutcome {
    /// The server accepted the request
    Success(Bytes),
    /// The server rejected the credential with `401` or `403`
    AuthExpired(TransportError),
    /// Any other failure
    Failed(TransportError),
}

impl TransportOutcome {
    /// Classifies a non-success response
    pub fn from_error_status(status: StatusCode, body: impl Into<String>) -> Self {
        let error = TransportError::Status {
            status,
            body: body.into(),
        };

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::AuthExpired(error)
        } else {
            Self::Failed(error)
        }
    }
}

/// Performs a single request attempt
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Sends the attempt and classifies the outcome
    async fn send(&self, attempt: &RequestAttempt) -> TransportOutcome;
}

/// A transport backed by a reqwest client and its middleware stack
///
/// The client should carry a cookie store so that the server-side session
/// backing token refreshes accompanies every request.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ClientWithMiddleware,
}

impl ReqwestTransport {
    /// Constructs a transport from a middleware-wrapped client
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }
}

impl From<reqwest::Client> for ReqwestTransport {
    fn from(client: reqwest::Client) -> Self {
        Self::new(ClientWithMiddleware::from(client))
    }
}

impl From<ClientWithMiddleware> for ReqwestTransport {
    fn from(client: ClientWithMiddleware) -> Self {
        Self::new(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, attempt: &RequestAttempt) -> TransportOutcome {
        let mut req = self
            .client
            .request(attempt.method().clone(), attempt.url().clone())
            .headers(attempt.headers().clone());

        if let Some(body) = attempt.body() {
            req = req.body(body.clone());
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(error) => return TransportOutcome::Failed(TransportError::Send(error)),
        };

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            request.method = %attempt.method(),
            request.path = attempt.url().path(),
            "received response"
        );

        if status.is_success() {
            match resp.bytes().await {
                Ok(body) => TransportOutcome::Success(body),
                Err(error) => TransportOutcome::Failed(TransportError::BodyRead(error)),
            }
        } else {
            let body = match resp.text().await {
                Ok(body) => body,
                Err(error) => {
                    tracing::debug!(
                        error = (&error as &dyn error::Error),
                        "unable to read error response body"
                    );
                    String::new()
                }
            };
            TransportOutcome::from_error_status(status, body)
        }
    }
}
