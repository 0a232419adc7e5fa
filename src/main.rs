//! Streaming relay between web clients and a local Ollama server
//!
//! (c) ollama-relay authors 2026

use ollama_relay::api;
use ollama_relay::build_provider;
use ollama_relay::infrastructure::config::RelayConfig;

use axum::http::Method;
use di_axum::RouterServiceProviderExtensions;
use log::info;
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env()?;

    // every session is a task on this one thread
    let runtime: Runtime = Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(web_server_task(config))
}

async fn web_server_task(config: RelayConfig) -> anyhow::Result<()> {
    let provider = build_provider(config.clone())?;

    let app = api::router()
        .merge(api::assets::router(&config.client_build_dir))
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_origin(Any),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        "relay listening on {}, upstream {}",
        listener.local_addr()?,
        config.upstream_base_url
    );
    axum::serve(listener, app).await?;
    info!("Shutting down...");

    Ok(())
}
