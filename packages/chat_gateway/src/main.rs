//! chatgate: real-time chat delivery gateway.
//!
//! Accepts WebSocket connections, authenticates them with platform
//! tokens, and routes private/group chat messages to local connections
//! and (through the relay channel) to peer processes.

mod config;
mod error;
mod handlers;
mod membership;
mod metrics;
mod persistence;
mod registry;
mod relay;
mod router;
mod state;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chat_gateway_auth::JwtValidator;

use crate::config::{FileConfig, GatewayConfig, RelayMode, load_or_generate_secret};
use crate::membership::InMemoryMembership;
use crate::persistence::NullMessageSink;
use crate::relay::{LocalRelay, RedisRelay, RelayBus, run_relay_subscriber};
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "chatgate", about = "Real-time chat delivery gateway")]
struct Cli {
    /// Directory holding config.toml and the generated jwt secret
    #[arg(long, global = true, default_value = ".chatgate")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default)
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Verbose logging
        #[arg(long)]
        debug: bool,
    },
    /// Mint a development token for a user id
    Token {
        user_id: i64,
        /// Validity in minutes
        #[arg(long, default_value_t = 60)]
        ttl_mins: i64,
    },
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "chat_gateway=debug,tower_http=debug"
    } else {
        "chat_gateway=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_env("CHATGATE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Token { user_id, ttl_mins }) => {
            let file = FileConfig::load(&cli.config_dir)?;
            let secret = load_or_generate_secret(&file.auth, &cli.config_dir)?;
            let token = chat_gateway_auth::issue_token(
                &secret,
                user_id,
                chrono::Duration::minutes(ttl_mins),
            )?;
            println!("{token}");
            Ok(())
        }
        Some(Command::Serve { host, port, debug }) => serve(cli.config_dir, host, port, debug).await,
        None => serve(cli.config_dir, None, None, false).await,
    }
}

async fn serve(
    config_dir: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    debug: bool,
) -> anyhow::Result<()> {
    init_tracing(debug);

    let file = FileConfig::load(&config_dir)?;
    let mut config = GatewayConfig::from_file(&file)?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let secret = load_or_generate_secret(&file.auth, &config_dir)?;
    let validator = Arc::new(JwtValidator::new(&secret));

    let membership = Arc::new(InMemoryMembership::new());
    for (group_id, members) in &config.groups {
        membership.set_group(*group_id, members.clone());
    }

    let relay: Arc<dyn RelayBus> = match config.relay.mode {
        RelayMode::Local => {
            info!("relay: in-process loopback");
            Arc::new(LocalRelay::new())
        }
        RelayMode::Redis => {
            info!(
                url = %config.relay.redis_url,
                channel = %config.relay.channel,
                "relay: redis pub/sub"
            );
            Arc::new(
                RedisRelay::connect(&config.relay.redis_url, config.relay.channel.clone())
                    .await
                    .context("connecting to redis relay")?,
            )
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(
        config,
        validator,
        membership,
        relay,
        Arc::new(NullMessageSink),
    );

    let shutdown = CancellationToken::new();
    let subscriber = tokio::spawn(run_relay_subscriber(
        state.relay.clone(),
        state.registry.clone(),
        state.metrics.clone(),
        state.instance_id.clone(),
        shutdown.clone(),
    ));

    let app = Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "chat gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Ok(Err(err)) = subscriber.await {
        error!("relay subscriber exited with error: {}", err);
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received, shutting down");
    shutdown.cancel();
}
