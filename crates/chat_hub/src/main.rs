//! Chat hub entry point.
//!
//! WebSocket broadcast hub: clients connect on `/ws` and every text
//! message is fanned out to the other connected clients.

use anyhow::Result;
use chat_hub::{create_router, AppState, ClientRegistry, Dispatcher, HubConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting chat hub");

    // Read configuration from environment
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9094".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let config = HubConfig {
        outbound_capacity: env::var("OUTBOUND_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .expect("OUTBOUND_CAPACITY must be a number"),
        inbound_capacity: env::var("INBOUND_CAPACITY")
            .unwrap_or_else(|_| "1024".to_string())
            .parse()
            .expect("INBOUND_CAPACITY must be a number"),
        echo_to_sender: env::var("ECHO_TO_SENDER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
    };

    info!("Configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  OUTBOUND_CAPACITY: {}", config.outbound_capacity);
    info!("  INBOUND_CAPACITY: {}", config.inbound_capacity);
    info!("  ECHO_TO_SENDER: {}", config.echo_to_sender);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // The hub: registry + inbound queue + dispatcher, built here and
    // passed by handle — no ambient globals.
    let registry = Arc::new(ClientRegistry::new());
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(config.inbound_capacity);

    // Create shutdown channel for the dispatcher
    let (dispatcher_shutdown_tx, dispatcher_shutdown_rx) = mpsc::channel(1);

    // Spawn the single fan-out worker
    let dispatcher = Dispatcher::new(
        registry.clone(),
        inbound_rx,
        dispatcher_shutdown_rx,
        &config,
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    // Create application state and HTTP router
    let state = Arc::new(AppState {
        registry,
        inbound_tx,
        config,
    });
    let app = create_router(state);

    // Start HTTP server; a bind failure is fatal
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Chat hub listening on {}", addr);

    // Run server with graceful shutdown. The connect-info make-service
    // surfaces the peer address that client identities derive from.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Shutdown dispatcher
    info!("Shutting down dispatcher...");
    let _ = dispatcher_shutdown_tx.send(()).await;
    let _ = dispatcher_handle.await;

    info!("Chat hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
