use std::{error, fmt, sync::Arc};

use reqwest_middleware::{ClientBuilder, Middleware};
use serde::de::DeserializeOwned;
use tessera_session::{
    ApiConfig, AuthAuthority, CookieAuthority, InMemorySessionStore, RefreshCoordinator,
    SessionStore,
};

use crate::{
    AuthenticatedRequestExecutor, LoginNavigator, ReqwestTransport, RequestError, RequestOptions,
    TracingNavigator,
};

/// An API client that keeps its session alive
///
/// Requests and token refreshes share one cookie-carrying client, so the
/// session cookie set at login is presented to the refresh endpoint.
#[derive(Clone, Debug)]
pub struct SessionClient {
    authority: Arc<CookieAuthority>,
    executor: AuthenticatedRequestExecutor,
}

impl SessionClient {
    /// Starts building a client for the API at `config`
    pub fn builder(config: ApiConfig) -> SessionClientBuilder {
        SessionClientBuilder::new(config)
    }

    /// Sends a request and decodes the JSON response body
    ///
    /// See [`AuthenticatedRequestExecutor::execute()`].
    pub async fn execute<T>(&self, path: &str, options: RequestOptions) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        self.executor.execute(path, options).await
    }

    /// The executor issuing this client's requests
    pub fn executor(&self) -> &AuthenticatedRequestExecutor {
        &self.executor
    }

    /// The session store holding the access token and user
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.executor.store()
    }

    /// The authority issuing access tokens
    pub fn authority(&self) -> &CookieAuthority {
        &self.authority
    }

    /// The coordinator refreshing access tokens
    pub fn coordinator(&self) -> &RefreshCoordinator {
        self.executor.coordinator()
    }

    /// Ends the session
    ///
    /// The authority is asked to end the server-side session, but the local
    /// session is cleared whether or not it succeeds.
    pub async fn logout(&self) {
        if let Err(error) = self.authority.logout().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to end server-side session"
            );
        }

        self.store().clear_auth();
    }
}

/// A builder for a [`SessionClient`]
pub struct SessionClientBuilder {
    config: ApiConfig,
    client: Option<reqwest::Client>,
    store: Option<Arc<dyn SessionStore>>,
    navigator: Option<Arc<dyn LoginNavigator>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl SessionClientBuilder {
    fn new(config: ApiConfig) -> Self {
        Self {
            config,
            client: None,
            store: None,
            navigator: None,
            middleware: Vec::new(),
        }
    }

    /// Uses an existing reqwest client
    ///
    /// The client should have been built with a cookie store. By default, a
    /// new client with a cookie store is constructed.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Uses a custom session store
    ///
    /// Defaults to an empty [`InMemorySessionStore`].
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses a custom login navigator
    ///
    /// Defaults to [`TracingNavigator`].
    pub fn with_navigator(mut self, navigator: impl LoginNavigator + 'static) -> Self {
        self.navigator = Some(Arc::new(navigator));
        self
    }

    /// Adds middleware to the stack used for API requests
    ///
    /// Middleware runs in the order added. Token refreshes do not pass
    /// through it.
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Builds the client
    pub fn build(self) -> Result<SessionClient, reqwest::Error> {
        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder().cookie_store(true).build()?,
        };

        let store: Arc<dyn SessionStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemorySessionStore::new()),
        };

        let navigator: Arc<dyn LoginNavigator> = match self.navigator {
            Some(navigator) => navigator,
            None => Arc::new(TracingNavigator),
        };

        let authority = Arc::new(CookieAuthority::new(client.clone(), self.config.clone()));
        let coordinator = RefreshCoordinator::new(authority.clone(), store);

        let transport = self
            .middleware
            .into_iter()
            .fold(ClientBuilder::new(client), ClientBuilder::with_arc)
            .build();

        let executor = AuthenticatedRequestExecutor::new(
            self.config,
            Arc::new(ReqwestTransport::new(transport)),
            coordinator,
            navigator,
        );

        Ok(SessionClient {
            authority,
            executor,
        })
    }
}

impl fmt::Debug for SessionClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClientBuilder")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("store", &self.store)
            .field("navigator", &self.navigator)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}
