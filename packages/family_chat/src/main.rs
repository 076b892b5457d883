use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use chat_relay::{ClientRegistry, GatewayLink, MusicSearch, RelayCoordinator, RelayMetrics};

mod config;
mod handlers;
#[cfg(test)]
mod test_helpers;
mod youtube;

use config::FileConfig;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "family-chat")]
#[command(about = "Family chat relay between browsers and a gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config.toml (optional; missing file means defaults)
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server (default)
    Serve(ServeArgs),
    /// Run one music search with the configured backend and print the results
    Search(SearchArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Gateway WebSocket URL
    #[arg(long)]
    gateway_url: Option<String>,

    /// Directory with the browser client
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, fc: &mut FileConfig) {
        if let Some(host) = self.host {
            fc.server.host = host;
        }
        if let Some(port) = self.port {
            fc.server.port = port;
        }
        if let Some(url) = self.gateway_url {
            fc.gateway.url = url;
        }
        if let Some(dir) = self.static_dir {
            fc.server.static_dir = dir;
        }
    }
}

#[derive(Args)]
struct SearchArgs {
    /// Search terms
    #[arg(required = true)]
    query: Vec<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayCoordinator>,
    /// Backend for HTTP searches; the relay holds the same one for chat searches
    pub search: Arc<dyn MusicSearch>,
    /// Outbound queue length per browser connection
    pub client_queue: usize,
    /// Fires when the server is shutting down
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config: FileConfig = config::load_config(&cli.config)
        .extract()
        .with_context(|| format!("Invalid configuration ({})", cli.config.display()))?;
    file_config
        .validate()
        .with_context(|| format!("Invalid configuration ({})", cli.config.display()))?;

    match cli.command {
        None => run_server(ServeArgs::default(), file_config, cli.debug).await,
        Some(Commands::Serve(args)) => run_server(args, file_config, cli.debug).await,
        Some(Commands::Search(args)) => search_command(args, file_config, cli.debug).await,
    }
}

fn init_tracing(default_directive: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn build_router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/api/music/search", get(handlers::music_search_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, mut fc: FileConfig, debug: bool) -> Result<()> {
    // Setup logging
    let default_directive = if debug {
        "family_chat=debug,chat_relay=debug,tower_http=debug,info"
    } else {
        "family_chat=info,chat_relay=info,tower_http=info,warn"
    };
    init_tracing(default_directive);

    args.apply(&mut fc);
    info!("Starting Family Chat relay");

    let metrics = Arc::new(RelayMetrics::new());
    let search = youtube::search_backend(&fc.search)?;
    let (link, forwarded) = GatewayLink::new(fc.gateway.to_gateway_config(), metrics.clone());
    let registry = Arc::new(ClientRegistry::new(fc.server.name.clone(), metrics.clone()));
    let relay = Arc::new(RelayCoordinator::new(
        link.clone(),
        registry,
        search.clone(),
        metrics,
    ));

    let cancel = CancellationToken::new();
    info!("Gateway: {}", fc.gateway.url);
    let link_task = tokio::spawn(link.run(cancel.clone()));
    let relay_task = tokio::spawn(relay.clone().run(forwarded, cancel.clone()));

    if !fc.server.static_dir.is_dir() {
        warn!(
            "Static directory {} does not exist; only API routes will respond",
            fc.server.static_dir.display()
        );
    }

    let state = AppState {
        relay,
        search,
        client_queue: fc.server.client_queue,
        shutdown: cancel.clone(),
    };
    let app = build_router(state, &fc.server.static_dir);

    let listener = tokio::net::TcpListener::bind((fc.server.host.as_str(), fc.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", fc.server.host, fc.server.port))?;
    info!("Family Chat listening on http://{}", listener.local_addr()?);

    let shutdown_cancel = cancel.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
        shutdown_cancel.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    cancel.cancel();
    let _ = tokio::join!(link_task, relay_task);
    info!("Server shutdown complete");
    Ok(())
}

async fn search_command(args: SearchArgs, fc: FileConfig, debug: bool) -> Result<()> {
    init_tracing(if debug { "family_chat=debug,info" } else { "warn" });

    let query = args.query.join(" ");
    let search = youtube::search_backend(&fc.search)?;
    let results = search.search(&query).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
