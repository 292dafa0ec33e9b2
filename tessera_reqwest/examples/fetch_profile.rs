use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tessera_reqwest::{
    AccessToken, ApiConfig, FnNavigator, InMemorySessionStore, RequestOptions, SessionClient,
    SessionStore,
};
use tessera_session::SharedRoleMarker;

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the API
    #[arg(short, long, env = "API_BASE_URL")]
    base_url: reqwest::Url,

    /// The path of the resource to fetch
    #[arg(short, long, default_value = "/api/profile")]
    path: String,

    /// An access token to start the session with
    #[arg(short, long, env, hide_env_values = true)]
    access_token: Option<AccessToken>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let role = SharedRoleMarker::new();
    let store = Arc::new(InMemorySessionStore::new().with_role_marker(role.clone()));
    if let Some(token) = opts.access_token {
        store.set_access_token(token);
    }

    let client = SessionClient::builder(ApiConfig::new(opts.base_url))
        .with_store(store.clone())
        .with_navigator(FnNavigator::new(|| {
            eprintln!("Session expired. Log in again to continue.")
        }))
        .build()?;

    let resource: Value = client.execute(&opts.path, RequestOptions::get()).await?;

    println!("{}", serde_json::to_string_pretty(&resource)?);
    tracing::info!(
        authenticated = store.is_authenticated(),
        role = ?role.get(),
        "request complete"
    );

    Ok(())
}
