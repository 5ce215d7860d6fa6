use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use meeting_relay::bus::{BusClient, Topics};
use meeting_relay::config::Config;
use meeting_relay::context::{run_store, ContextStore, ContextStoreConfig};
use meeting_relay::gateway::{
    create_router, run_caption_relay, run_gateway_teardown, BusGatewayEvents, GatewayState,
    HttpSessionValidator, SessionRegistry, SessionValidator, StaticValidator,
};
use meeting_relay::stt::{
    run_engine, ConnectionConfig, HttpProviderConfig, HttpSttProvider, SttManagerConfig,
    SttSessionManager,
};
use meeting_relay::transcript::{run_finalizer, FinalizerConfig, UtteranceFinalizer};

#[derive(Parser)]
#[command(name = "meeting-relay")]
#[command(about = "Meeting audio ingress, transcription, and context assembly")]
struct Args {
    /// Configuration file (extension optional, file optional)
    #[arg(short, long, default_value = "config/meeting-relay")]
    config: String,

    /// Override the configured HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meeting_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.server.port = port;
    }

    info!("Meeting Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Bus: {} (namespace {})", cfg.bus.url, cfg.bus.namespace);

    let bus = BusClient::connect(&cfg.bus.url)
        .await
        .context("Failed to connect to the message bus")?;
    let topics = Topics::new(&cfg.bus.namespace);

    let validator: Arc<dyn SessionValidator> = match &cfg.gateway.validation_url {
        Some(url) => {
            info!("Validating sessions against {}", url);
            Arc::new(HttpSessionValidator::new(
                url,
                cfg.gateway.validation_timeout_ms,
            )?)
        }
        None => {
            warn!("No session authority configured; admitting every connection");
            Arc::new(StaticValidator::allow_all())
        }
    };

    let provider = HttpSttProvider::new(HttpProviderConfig {
        url: cfg.stt.provider_url.clone(),
        api_key: cfg.stt.api_key.clone(),
        ..Default::default()
    })?;
    let (manager, transcript_rx) = SttSessionManager::new(
        Arc::new(provider),
        SttManagerConfig {
            max_sessions: cfg.stt.max_sessions,
            connection: ConnectionConfig {
                reconnect_base_ms: cfg.stt.reconnect_base_ms,
                reconnect_cap_ms: cfg.stt.reconnect_cap_ms,
                max_reconnect_attempts: cfg.stt.max_reconnect_attempts,
                audio_queue: cfg.stt.audio_queue,
            },
        },
    );
    let manager = Arc::new(manager);

    let finalizer = Arc::new(UtteranceFinalizer::new(FinalizerConfig {
        max_partials: cfg.transcript.max_partials,
        merge_gap_ms: cfg.transcript.merge_gap_ms,
    }));
    let store = Arc::new(ContextStore::new(ContextStoreConfig {
        capacity: cfg.context.capacity,
        max_age_ms: cfg.context.max_age_ms,
        max_characters: cfg.context.max_characters,
        reserved_characters: cfg.context.reserved_characters,
    }));
    let registry = Arc::new(SessionRegistry::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = vec![
        tokio::spawn(run_engine(
            bus.clone(),
            topics.clone(),
            manager.clone(),
            transcript_rx,
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_finalizer(
            bus.clone(),
            topics.clone(),
            finalizer.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_store(
            bus.clone(),
            topics.clone(),
            store.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_caption_relay(
            bus.clone(),
            topics.clone(),
            registry.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_gateway_teardown(
            bus.clone(),
            topics.clone(),
            registry.clone(),
            shutdown_rx,
        )),
    ];

    let state = GatewayState {
        registry,
        validator,
        events: Arc::new(BusGatewayEvents::new(bus.clone(), topics)),
        settings: cfg.gateway.clone(),
        context: store,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The watch flips first so every loop drains and flushes before the
    // bus connection goes away.
    let _ = shutdown_tx.send(true);
    for mut task in tasks {
        match tokio::time::timeout(std::time::Duration::from_secs(5), &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("Background task exited with error: {}", e),
            Ok(Err(e)) => warn!("Background task panicked: {}", e),
            Err(_) => {
                warn!("Background task did not stop in time, aborting it");
                task.abort();
            }
        }
    }
    bus.close().await?;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
