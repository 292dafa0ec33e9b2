use std::{error, sync::Arc};

use bytes::Bytes;
use predicates::Predicate;
use serde::de::DeserializeOwned;
use tessera_session::{ApiConfig, RefreshCoordinator, SessionStore};

use crate::{
    predicate::WithinBaseUrl, LoginNavigator, RequestAttempt, RequestError, RequestOptions,
    Transport, TransportOutcome,
};

/// Issues requests carrying the session's access token
///
/// When the server rejects the token with `401` or `403`, the executor asks
/// its [`RefreshCoordinator`] for a new token and retries the request once.
/// Concurrent requests rejected at the same time share a single refresh.
///
/// If the refresh fails, the request fails with
/// [`RequestError::AuthenticationFailed`]. The session is cleared and the
/// user sent to log in once per failed refresh, however many requests were
/// waiting on it.
///
/// If the retry fails, the failure is returned as
/// [`RequestError::RetryFailed`] and the session is left alone. Any other
/// failure is returned unchanged without attempting a refresh.
#[derive(Clone, Debug)]
pub struct AuthenticatedRequestExecutor<P = WithinBaseUrl> {
    config: ApiConfig,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    navigator: Arc<dyn LoginNavigator>,
    predicate: P,
}

impl AuthenticatedRequestExecutor<WithinBaseUrl> {
    /// Constructs a new executor
    ///
    /// The session store written to on refresh and cleared on authentication
    /// failure is the coordinator's store. By default, the access token is
    /// only attached to requests under the base URL of `config`; provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()] to
    /// change that.
    pub fn new(
        config: ApiConfig,
        transport: Arc<dyn Transport>,
        coordinator: RefreshCoordinator,
        navigator: Arc<dyn LoginNavigator>,
    ) -> Self {
        Self {
            predicate: WithinBaseUrl::new(&config),
            config,
            transport,
            coordinator,
            navigator,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AuthenticatedRequestExecutor<P> {
        AuthenticatedRequestExecutor {
            config: self.config,
            transport: self.transport,
            coordinator: self.coordinator,
            navigator: self.navigator,
            predicate,
        }
    }
}

impl<P> AuthenticatedRequestExecutor<P>
where
    P: Predicate<RequestAttempt> + Send + Sync,
{
    /// The configuration used to resolve request paths
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// The session store holding the access token
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.coordinator.store()
    }

    /// The coordinator used to refresh rejected access tokens
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Sends a request and decodes the JSON response body
    ///
    /// An empty response body decodes as JSON `null`, so `()` and `Option`
    /// targets accept it.
    pub async fn execute<T>(&self, path: &str, options: RequestOptions) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        let body = self.execute_raw(path, options).await?;
        decode(&body)
    }

    /// Sends a request and returns the response body as-is
    pub async fn execute_raw(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Bytes, RequestError> {
        let url = self.config.resolve(path)?;
        self.run(RequestAttempt::from_options(url, options)).await
    }

    #[tracing::instrument(
        skip_all,
        fields(
            request.method = %attempt.method(),
            request.path = attempt.url().path(),
        ),
    )]
    async fn run(&self, attempt: RequestAttempt) -> Result<Bytes, RequestError> {
        let rejected = match self.transport.send(&self.authorize(&attempt)).await {
            TransportOutcome::Success(body) => return Ok(body),
            TransportOutcome::Failed(error) => return Err(RequestError::Transport(error)),
            TransportOutcome::AuthExpired(error) => error,
        };

        tracing::debug!(
            response.status = rejected.status().map(|s| s.as_u16()),
            "access token rejected, refreshing"
        );

        let outcome = self.coordinator.refresh_outcome().await;
        if !outcome.is_refreshed() {
            if outcome.claim_failure() {
                self.store().clear_auth();
                self.navigator.navigate_to_login();
                tracing::info!(
                    epoch = outcome.epoch(),
                    "unable to refresh access token, session ended"
                );
            } else {
                tracing::debug!(
                    epoch = outcome.epoch(),
                    "session already ended by a concurrent request"
                );
            }
            return Err(RequestError::AuthenticationFailed);
        }

        match self.transport.send(&self.authorize(&attempt)).await {
            TransportOutcome::Success(body) => Ok(body),
            TransportOutcome::AuthExpired(error) | TransportOutcome::Failed(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "request failed after refreshing access token"
                );
                Err(RequestError::RetryFailed(error))
            }
        }
    }

    fn authorize(&self, attempt: &RequestAttempt) -> RequestAttempt {
        if !self.predicate.eval(attempt) {
            tracing::trace!("predicate declined to attach access token");
            return attempt.clone();
        }

        match self.store().access_token() {
            Some(token) => attempt.with_bearer(&token),
            None => attempt.clone(),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RequestError> {
    let body = if body.is_empty() { &b"null"[..] } else { body };
    serde_json::from_slice(body).map_err(RequestError::Decode)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use futures::future::join_all;
    use reqwest::{header, StatusCode};
    use serde::Deserialize;
    use tessera_session::{
        AccessToken, AuthAuthority, AuthorityError, Email, InMemorySessionStore, RefreshGrant,
        Role, UserProfile,
    };

    use super::*;
    use crate::{FnNavigator, ReqwestTransport, TransportError};

    #[derive(Debug, Default)]
    struct Recorded {
        urls: Vec<String>,
        authorizations: Vec<Option<String>>,
    }

    /// Replies from a fixed script, one entry per call
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<(StatusCode, &'static str)>>,
        recorded: Mutex<Recorded>,
    }

    impl ScriptedTransport {
        fn new(script: &[(StatusCode, &'static str)]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                recorded: Mutex::default(),
            }
        }

        fn authorizations(&self) -> Vec<Option<String>> {
            self.recorded.lock().unwrap().authorizations.clone()
        }

        fn urls(&self) -> Vec<String> {
            self.recorded.lock().unwrap().urls.clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, attempt: &RequestAttempt) -> TransportOutcome {
            record(&self.recorded, attempt);

            let (status, body) = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more often than scripted");

            if status.is_success() {
                TransportOutcome::Success(Bytes::from_static(body.as_bytes()))
            } else {
                TransportOutcome::from_error_status(status, body)
            }
        }
    }

    /// Accepts only one bearer token and rejects everything else with `401`
    #[derive(Debug)]
    struct GatedTransport {
        accepted: &'static str,
        recorded: Mutex<Recorded>,
    }

    impl GatedTransport {
        fn accepting(accepted: &'static str) -> Self {
            Self {
                accepted,
                recorded: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(&self, attempt: &RequestAttempt) -> TransportOutcome {
            record(&self.recorded, attempt);
            tokio::task::yield_now().await;

            let authorization = attempt
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            if authorization == Some(self.accepted) {
                TransportOutcome::Success(Bytes::from_static(br#"{"ok":true}"#))
            } else {
                TransportOutcome::from_error_status(StatusCode::UNAUTHORIZED, "expired")
            }
        }
    }

    fn record(recorded: &Mutex<Recorded>, attempt: &RequestAttempt) {
        let mut recorded = recorded.lock().unwrap();
        recorded.urls.push(attempt.url().to_string());
        recorded.authorizations.push(
            attempt
                .headers()
                .get(header::AUTHORIZATION)
                .map(|v| v.to_str().unwrap().to_owned()),
        );
    }

    #[derive(Debug)]
    struct FakeAuthority {
        calls: AtomicUsize,
        issue: Option<&'static str>,
    }

    impl FakeAuthority {
        fn issuing(token: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                issue: Some(token),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                issue: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl AuthAuthority for FakeAuthority {
        async fn refresh(&self) -> Result<RefreshGrant, AuthorityError> {
            self.calls.fetch_add(1, Ordering::AcqRel);
            tokio::time::sleep(Duration::from_millis(20)).await;

            let token = self.issue.ok_or(AuthorityError::Rejected {
                status: StatusCode::UNAUTHORIZED,
                body: String::new(),
            })?;

            Ok(RefreshGrant {
                access_token: AccessToken::from_static(token),
                user: Some(profile()),
            })
        }
    }

    fn profile() -> UserProfile {
        UserProfile::new(Email::from_static("a@b.com"))
            .with_role(Role::from_static("USER"))
            .with_names("A", "B")
    }

    struct Harness<T> {
        executor: AuthenticatedRequestExecutor,
        transport: Arc<T>,
        authority: Arc<FakeAuthority>,
        store: Arc<InMemorySessionStore>,
        redirects: Arc<AtomicUsize>,
    }

    fn harness<T: Transport + 'static>(transport: T, authority: FakeAuthority) -> Harness<T> {
        harness_at("https://api.example.com", transport, authority)
    }

    fn harness_at<T: Transport + 'static>(
        base_url: &str,
        transport: T,
        authority: FakeAuthority,
    ) -> Harness<T> {
        let transport = Arc::new(transport);
        let authority = Arc::new(authority);
        let store = Arc::new(InMemorySessionStore::new());
        store.establish(AccessToken::from_static("T1"), Some(profile()));

        let redirects = Arc::new(AtomicUsize::new(0));
        let navigator = {
            let redirects = redirects.clone();
            FnNavigator::new(move || {
                redirects.fetch_add(1, Ordering::AcqRel);
            })
        };

        let coordinator = RefreshCoordinator::new(authority.clone(), store.clone());
        let executor = AuthenticatedRequestExecutor::new(
            ApiConfig::new(base_url.parse().unwrap()),
            transport.clone(),
            coordinator,
            Arc::new(navigator),
        );

        Harness {
            executor,
            transport,
            authority,
            store,
            redirects,
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Profile {
        name: String,
    }

    mod when_first_attempt_succeeds {
        use super::*;

        #[tokio::test]
        async fn body_is_returned_without_refresh() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::OK, r#"{"name":"A"}"#)]),
                FakeAuthority::issuing("T2"),
            );

            let fetched: Profile = h
                .executor
                .execute("/api/profile", RequestOptions::get())
                .await
                .unwrap();

            assert_eq!(fetched, Profile { name: "A".into() });
            assert_eq!(h.authority.calls(), 0);
            assert_eq!(h.transport.authorizations(), vec![Some("Bearer T1".into())]);
            assert_eq!(h.transport.urls(), vec!["https://api.example.com/api/profile"]);
        }

        #[tokio::test]
        async fn empty_body_decodes_as_unit() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::NO_CONTENT, "")]),
                FakeAuthority::issuing("T2"),
            );

            h.executor
                .execute::<()>("/api/profile", RequestOptions::delete())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn request_without_token_is_sent_unauthenticated() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::OK, "{}")]),
                FakeAuthority::issuing("T2"),
            );
            h.store.clear_auth();

            h.executor
                .execute_raw("/api/public", RequestOptions::get())
                .await
                .unwrap();

            assert_eq!(h.transport.authorizations(), vec![None]);
        }

        #[tokio::test]
        async fn token_is_withheld_from_other_hosts() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::OK, "{}")]),
                FakeAuthority::issuing("T2"),
            );

            h.executor
                .execute_raw("https://cdn.example.net/asset.json", RequestOptions::get())
                .await
                .unwrap();

            assert_eq!(h.transport.authorizations(), vec![None]);
            assert_eq!(h.transport.urls(), vec!["https://cdn.example.net/asset.json"]);
        }

        #[tokio::test]
        async fn custom_predicate_decides_attachment() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::OK, "{}")]),
                FakeAuthority::issuing("T2"),
            );
            let executor = h
                .executor
                .clone()
                .with_predicate(predicates::constant::always());

            executor
                .execute_raw("https://cdn.example.net/asset.json", RequestOptions::get())
                .await
                .unwrap();

            assert_eq!(h.transport.authorizations(), vec![Some("Bearer T1".into())]);
        }
    }

    mod when_first_attempt_is_rejected {
        use super::*;

        #[tokio::test]
        async fn token_is_refreshed_and_request_retried_once() {
            let h = harness(
                ScriptedTransport::new(&[
                    (StatusCode::UNAUTHORIZED, ""),
                    (StatusCode::OK, r#"{"name":"A"}"#),
                ]),
                FakeAuthority::issuing("T2"),
            );

            let fetched: Profile = h
                .executor
                .execute("/api/profile", RequestOptions::get())
                .await
                .unwrap();

            assert_eq!(fetched.name, "A");
            assert_eq!(h.authority.calls(), 1);
            assert_eq!(
                h.transport.authorizations(),
                vec![Some("Bearer T1".into()), Some("Bearer T2".into())]
            );
            assert_eq!(h.store.access_token(), Some(AccessToken::from_static("T2")));
            assert_eq!(h.store.user(), Some(profile()));
        }

        #[tokio::test]
        async fn forbidden_also_triggers_refresh() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::FORBIDDEN, ""), (StatusCode::OK, "{}")]),
                FakeAuthority::issuing("T2"),
            );

            h.executor
                .execute_raw("/api/profile", RequestOptions::get())
                .await
                .unwrap();

            assert_eq!(h.authority.calls(), 1);
        }

        #[tokio::test]
        async fn concurrent_rejections_share_one_refresh() {
            let h = harness(GatedTransport::accepting("Bearer T2"), FakeAuthority::issuing("T2"));

            let results = join_all(
                (0..5).map(|_| h.executor.execute_raw("/api/profile", RequestOptions::get())),
            )
            .await;

            assert!(results.iter().all(Result::is_ok));
            assert_eq!(h.authority.calls(), 1);

            let authorizations = h.transport.recorded.lock().unwrap().authorizations.clone();
            let (stale, fresh): (Vec<_>, Vec<_>) = authorizations
                .iter()
                .partition(|a| a.as_deref() == Some("Bearer T1"));
            assert_eq!(stale.len(), 5);
            assert_eq!(fresh.len(), 5);
            assert!(fresh.iter().all(|a| a.as_deref() == Some("Bearer T2")));
        }

        #[tokio::test]
        async fn failed_refresh_ends_session_without_retry() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::UNAUTHORIZED, "")]),
                FakeAuthority::failing(),
            );

            let err = h
                .executor
                .execute_raw("/api/profile", RequestOptions::get())
                .await
                .unwrap_err();

            assert!(err.is_authentication_failure());
            assert_eq!(err.to_string(), "authentication failed");
            assert_eq!(h.transport.authorizations().len(), 1);
            assert_eq!(h.redirects.load(Ordering::Acquire), 1);
            assert!(!h.store.is_authenticated());
            assert_eq!(h.store.user(), None);
        }

        #[tokio::test]
        async fn concurrent_failed_refresh_ends_session_once() {
            let h = harness(GatedTransport::accepting("Bearer T9"), FakeAuthority::failing());

            let results = join_all(
                (0..5).map(|_| h.executor.execute_raw("/api/profile", RequestOptions::get())),
            )
            .await;

            assert!(results
                .iter()
                .all(|r| matches!(r, Err(RequestError::AuthenticationFailed))));
            assert_eq!(h.authority.calls(), 1);
            assert_eq!(h.redirects.load(Ordering::Acquire), 1);
            assert!(!h.store.is_authenticated());
            assert_eq!(h.transport.recorded.lock().unwrap().authorizations.len(), 5);
        }

        #[tokio::test]
        async fn failed_retry_keeps_session() {
            let h = harness(
                ScriptedTransport::new(&[
                    (StatusCode::UNAUTHORIZED, ""),
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid"),
                ]),
                FakeAuthority::issuing("T2"),
            );

            let err = h
                .executor
                .execute_raw("/api/profile", RequestOptions::post().body("x"))
                .await
                .unwrap_err();

            assert!(matches!(err, RequestError::RetryFailed(_)));
            assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
            assert_eq!(err.transport_error().and_then(|e| e.body()), Some("invalid"));
            assert_eq!(h.redirects.load(Ordering::Acquire), 0);
            assert_eq!(h.store.access_token(), Some(AccessToken::from_static("T2")));
        }

        #[tokio::test]
        async fn repeated_rejection_is_not_refreshed_again() {
            let h = harness(
                ScriptedTransport::new(&[
                    (StatusCode::UNAUTHORIZED, ""),
                    (StatusCode::FORBIDDEN, "not yours"),
                ]),
                FakeAuthority::issuing("T2"),
            );

            let err = h
                .executor
                .execute_raw("/api/records/7", RequestOptions::get())
                .await
                .unwrap_err();

            assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
            assert_eq!(h.authority.calls(), 1);
            assert_eq!(h.transport.authorizations().len(), 2);
            assert_eq!(h.redirects.load(Ordering::Acquire), 0);
            assert!(h.store.is_authenticated());
        }
    }

    mod when_first_attempt_fails_otherwise {
        use super::*;

        #[tokio::test]
        async fn server_error_is_returned_without_refresh() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::INTERNAL_SERVER_ERROR, "boom")]),
                FakeAuthority::issuing("T2"),
            );

            let err = h
                .executor
                .execute_raw("/api/profile", RequestOptions::get())
                .await
                .unwrap_err();

            assert!(matches!(err, RequestError::Transport(_)));
            assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
            assert_eq!(h.authority.calls(), 0);
            assert_eq!(h.redirects.load(Ordering::Acquire), 0);
            assert_eq!(h.store.access_token(), Some(AccessToken::from_static("T1")));
        }

        #[tokio::test]
        async fn network_error_is_returned_without_refresh() {
            let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let base_url = format!("http://{}", closed.local_addr().unwrap());
            drop(closed);

            let h = harness_at(
                &base_url,
                ReqwestTransport::from(reqwest::Client::new()),
                FakeAuthority::issuing("T2"),
            );

            let err = h
                .executor
                .execute_raw("/api/profile", RequestOptions::get())
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                RequestError::Transport(TransportError::Send(_))
            ));
            assert_eq!(err.status(), None);
            assert_eq!(h.authority.calls(), 0);
            assert_eq!(h.redirects.load(Ordering::Acquire), 0);
            assert_eq!(h.store.access_token(), Some(AccessToken::from_static("T1")));
        }

        #[tokio::test]
        async fn undecodable_body_is_a_decode_error() {
            let h = harness(
                ScriptedTransport::new(&[(StatusCode::OK, "not json")]),
                FakeAuthority::issuing("T2"),
            );

            let err = h
                .executor
                .execute::<Profile>("/api/profile", RequestOptions::get())
                .await
                .unwrap_err();

            assert!(matches!(err, RequestError::Decode(_)));
        }
    }
}
