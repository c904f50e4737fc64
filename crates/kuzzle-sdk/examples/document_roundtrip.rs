//! Document Round-trip Example
//!
//! Logs in, writes a document, reads it back and deletes it against a
//! running Kuzzle backend.
//!
//! Run with: `cargo run -p kuzzle-sdk --example document_roundtrip`
//!
//! Set `KUZZLE_URL` to override the default `ws://localhost:7512`, and
//! `KUZZLE_USERNAME`/`KUZZLE_PASSWORD` to authenticate first.

use std::time::Duration;

use kuzzle_sdk::{
    Kuzzle,
    controllers::{CreateOptions, SearchOptions},
    websocket::{WebSocketProtocol, WsConfig},
};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kuzzle_sdk=debug".into()),
        )
        .init();

    let url = std::env::var("KUZZLE_URL").unwrap_or_else(|_| "ws://localhost:7512".to_string());
    let config = WsConfig::new(url).connect_timeout(Duration::from_secs(5));
    let kuzzle = Kuzzle::new(WebSocketProtocol::new(config)?)?;

    kuzzle.register_token_expired_event(|| warn!("Authentication token expired"));
    kuzzle.register_unhandled_response_event(|response| {
        info!(request_id = ?response.request_id, "Unhandled response");
    });

    kuzzle.connect().await?;

    if let (Ok(username), Ok(password)) = (
        std::env::var("KUZZLE_USERNAME"),
        std::env::var("KUZZLE_PASSWORD"),
    ) {
        kuzzle
            .auth()
            .login("local", json!({"username": username, "password": password}), None)
            .await?;
        info!("Logged in");
    }

    let now = kuzzle
        .query_and_wait(json!({"controller": "server", "action": "now"}))
        .await?;
    info!(result = ?now.result, "Server time");

    let document = kuzzle.document();
    let created = document
        .create(
            "nyc-open-data",
            "yellow-taxi",
            json!({"name": "Yoann", "licence": "B"}),
            CreateOptions::default().id("example-doc").wait_for_refresh(true),
        )
        .await?;
    info!(?created, "Document created");

    let fetched = document
        .get("nyc-open-data", "yellow-taxi", "example-doc")
        .await?;
    info!(source = %fetched["_source"], "Document fetched");

    let page = document
        .search(
            "nyc-open-data",
            "yellow-taxi",
            json!({"query": {"match": {"name": "Yoann"}}}),
            SearchOptions::default().size(10),
        )
        .await?;
    info!(total = page.total, hits = page.hits.len(), "Search done");

    let deleted = document
        .delete("nyc-open-data", "yellow-taxi", "example-doc", true)
        .await?;
    info!(id = %deleted, "Document deleted");

    kuzzle.disconnect().await?;
    Ok(())
}
