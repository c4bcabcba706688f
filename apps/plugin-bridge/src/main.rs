mod cli;
mod config;
mod endpoint;
mod metadata;
mod protocol;
mod registry;
mod router;
mod runner;
mod sessions;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    cli::{Cli, Commands},
    config::Config,
    endpoint::{spawn_endpoint_session, EndpointSessions},
    metadata::MetadataStore,
    registry::EndpointRegistry,
    router::MessageRouter,
    runner::{InProcessRunner, RemoteAwareRunner},
    sessions::{spawn_heartbeat, websocket_handler, BridgeState, ClientSessions},
};
use clap::Parser;

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Probe subcommand runs as a client against an existing bridge
    if let Some(Commands::Probe { url, command }) = cli.command {
        if let Err(e) = cli::run_probe(url, command).await {
            error!("probe error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    let registry = Arc::new(EndpointRegistry::from_env());
    info!(
        "starting plugin bridge on port {} with {} remote endpoint(s), {} plugin binding(s)",
        config.port,
        registry.endpoints().len(),
        registry.binding_count()
    );

    let metadata = Arc::new(MetadataStore::new(registry.endpoints()));
    let clients = Arc::new(ClientSessions::new());
    let endpoints = Arc::new(EndpointSessions::new());
    let router = Arc::new(MessageRouter::new(
        registry.clone(),
        endpoints.clone(),
        clients.clone(),
    ));
    let runner = Arc::new(RemoteAwareRunner::new(
        router.clone(),
        metadata.clone(),
        Box::new(InProcessRunner),
    ));

    for endpoint in registry.endpoints() {
        spawn_endpoint_session(
            endpoint.clone(),
            endpoints.clone(),
            metadata.clone(),
            router.clone(),
        );
    }
    spawn_heartbeat(clients.clone());

    let state = BridgeState {
        sessions: clients,
        runner,
        metadata,
        registry,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("plugin bridge listening on {addr}");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    client_sessions: usize,
    remote_endpoints: usize,
    endpoints_reporting: usize,
}

async fn health_check(State(state): State<BridgeState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        client_sessions: state.sessions.len(),
        remote_endpoints: state.registry.endpoints().len(),
        endpoints_reporting: state.metadata.remote_endpoint_count(),
    })
}
