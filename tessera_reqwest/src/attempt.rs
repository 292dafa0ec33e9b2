//! Request descriptions

use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, Url,
};
use serde::Serialize;
use tessera_session::AccessTokenRef;

/// Describes the request a caller wants to make
///
/// Defaults to a `GET` with no extra headers and no body.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    method: Method,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RequestOptions {
    /// Constructs options for a request with the given method
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// A `GET` request
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// A `POST` request
    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    /// A `PUT` request
    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    /// A `PATCH` request
    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    /// A `DELETE` request
    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Adds a header to the request
    ///
    /// An `Authorization` header is replaced by the session's access token
    /// whenever one is attached.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Appends a query parameter to the request URL
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Sets a raw request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` as the JSON request body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?.into());
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }
}

/// A single attempt at sending a request
///
/// Attempts are transient; the executor builds one per transport call.
#[derive(Clone, Debug)]
pub struct RequestAttempt {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestAttempt {
    /// Constructs an attempt from its parts
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    pub(crate) fn from_options(mut url: Url, options: RequestOptions) -> Self {
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(options.query.iter());
        }

        Self::new(options.method, url, options.headers, options.body)
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body, if any
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// A copy of this attempt carrying `token` as its bearer credential
    ///
    /// Tokens that cannot be represented as a header value are not attached.
    pub(crate) fn with_bearer(&self, token: &AccessTokenRef) -> Self {
        let mut attempt = self.clone();
        match bearer_header(token) {
            Some(value) => {
                attempt.headers.insert(header::AUTHORIZATION, value);
            }
            None => {
                tracing::warn!("access token contains bytes not valid in a header, not attaching");
            }
        }
        attempt
    }
}

fn bearer_header(token: &AccessTokenRef) -> Option<HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = HeaderValue::from_maybe_shared(header_value.freeze()).ok()?;
    value.set_sensitive(true);
    Some(value)
}
