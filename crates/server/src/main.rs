use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use apigate_gateway::{Gateway, InProcessEventBus, Router as GatewayRouter, UsageRecorder, UsageRollup};
use apigate_server::api::{router, AppState};
use apigate_server::config::ApigateConfig;
use apigate_server::metrics::ServerMetrics;
use apigate_server::state_factory::{create_metering_backend, create_state_backend};

/// APIGate standalone HTTP server.
#[derive(Parser, Debug)]
#[command(name = "apigate-server", about = "Standalone HTTP server for the APIGate gateway pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "apigate.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ApigateConfig::load(&cli.config)?;

    let state_backend = create_state_backend(&config.state).await?;
    let metering_store = create_metering_backend(&config.metering).await?;

    let gateway_router = Arc::new(GatewayRouter::new());
    gateway_router.reload(state_backend.routing_store.as_ref()).await?;

    let event_bus = Arc::new(InProcessEventBus::new());

    let usage_recorder_config =
        config.usage.to_recorder_config(config.gateway.rollup_interval_secs, config.gateway.usage_retention_days);
    let (usage_recorder, usage_batcher) = UsageRecorder::new(Arc::clone(&metering_store), usage_recorder_config);
    let usage_recorder = Arc::new(usage_recorder);

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&gateway_router),
        Arc::clone(&state_backend.routing_store),
        Arc::clone(&state_backend.principal_store),
        Arc::clone(&metering_store),
        Arc::clone(&usage_recorder),
        Arc::clone(&event_bus) as Arc<dyn apigate_core::EventBus>,
        config.gateway.to_gateway_config(),
    ));

    let webhook_engine = Arc::new(apigate_webhook::WebhookEngine::new(Arc::clone(&metering_store)).with_pool_size(config.webhook.pool_size));

    // route.*/upstream.* events rebuild the router's snapshot; everything
    // else is fanned out to the webhook engine for delivery.
    {
        let routing_store = Arc::clone(&state_backend.routing_store);
        let gateway_router = Arc::clone(&gateway_router);
        let webhook_engine = Arc::clone(&webhook_engine);
        let _subscription = event_bus.subscribe(Box::new(move |event| {
            if event.event_type.invalidates_route_cache() {
                let routing_store = Arc::clone(&routing_store);
                let gateway_router = Arc::clone(&gateway_router);
                tokio::spawn(async move {
                    if let Err(e) = gateway_router.reload(routing_store.as_ref()).await {
                        tracing::warn!(error = %e, "route cache reload failed");
                    }
                });
            } else {
                let webhook_engine = Arc::clone(&webhook_engine);
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = webhook_engine.publish(&event).await {
                        tracing::warn!(error = %e, "webhook publish failed");
                    }
                });
            }
        }));
        // Kept alive for the process lifetime; there's no runtime unsubscribe path yet.
        std::mem::forget(_subscription);
    }

    let mut shutdown_senders = Vec::new();

    let (usage_batcher_tx, usage_batcher_rx) = mpsc::channel(1);
    shutdown_senders.push(usage_batcher_tx);
    tokio::spawn(usage_batcher.run(usage_batcher_rx));

    let (rate_limit_tx, rate_limit_rx) = mpsc::channel(1);
    shutdown_senders.push(rate_limit_tx);
    tokio::spawn(gateway.rate_limiter().run_cleanup_loop(Duration::from_secs(config.gateway.rate_limit_cleanup_interval_secs), rate_limit_rx));

    let (quota_cleanup_tx, quota_cleanup_rx) = mpsc::channel(1);
    shutdown_senders.push(quota_cleanup_tx);
    tokio::spawn(gateway.quota_guard().run_cleanup_loop(Duration::from_secs(config.gateway.quota_cleanup_interval_secs), quota_cleanup_rx));

    let (rollup_tx, rollup_rx) = mpsc::channel(1);
    shutdown_senders.push(rollup_tx);
    let rollup = Arc::new(UsageRollup::new(Arc::clone(&metering_store), gateway.quota_guard()));
    tokio::spawn(apigate_server::background::run_rollup_loop(
        Arc::clone(&metering_store),
        rollup,
        Duration::from_secs(config.gateway.rollup_interval_secs),
        chrono::Duration::days(config.gateway.usage_retention_days),
        rollup_rx,
    ));

    let (webhook_retry_tx, webhook_retry_rx) = mpsc::channel(1);
    shutdown_senders.push(webhook_retry_tx);
    tokio::spawn(Arc::clone(&webhook_engine).run_retry_scheduler(Duration::from_secs(config.webhook.retry_sweep_interval_secs), webhook_retry_rx));

    let state = AppState { gateway: Arc::clone(&gateway), usage_recorder, metrics: ServerMetrics::new() };
    let app = router(state);

    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "apigate-server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(timeout_secs = config.server.shutdown_timeout_seconds, "shutting down background tasks");
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let drain = async {
        for sender in shutdown_senders {
            let _ = sender.send(()).await;
        }
    };
    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        tracing::warn!(timeout_secs = config.server.shutdown_timeout_seconds, "shutdown timeout exceeded");
    }

    info!("apigate-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
