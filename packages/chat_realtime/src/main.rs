use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chat_auth::TokenService;
use clap::{Args, Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use chat_realtime::AppState;
use chat_realtime::config::{ChatConfig, FileConfig, RealtimeConfig, load_config};
use chat_realtime::db::Database;
use chat_realtime::metrics::ServerMetrics;
use chat_realtime::repository::ChatRepository;
use chat_realtime::ws::RealtimeHub;

/// Custom span maker that includes a unique request ID for correlation
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

/// Secret used by `--dev-secret`. Never use outside local development.
const DEV_SECRET: &str = "chat-realtime-dev-secret";

#[derive(Parser)]
#[command(name = "chat-realtime")]
#[command(about = "Realtime presence and message fanout for chat conversations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.chat-realtime)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the realtime server
    Serve(ServeArgs),
    /// Mint an access token for a user with the configured secret
    IssueToken {
        /// User the token is issued for
        user_id: String,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Fall back to a built-in signing secret when none is configured
    #[arg(long)]
    dev_secret: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ChatConfig::new(cli.data_dir)?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", config.config_toml_path().display()))?;

    match cli.command {
        Commands::Serve(args) => run_server(config, file_config, args).await,
        Commands::IssueToken { user_id } => {
            let tokens = token_service(&file_config, false)?;
            let token = tokens
                .issue(&user_id)
                .with_context(|| format!("Failed to issue token for {}", user_id))?;
            println!("{}", token);
            Ok(())
        }
    }
}

fn token_service(file_config: &FileConfig, allow_dev_secret: bool) -> Result<TokenService> {
    let secret = match (&file_config.auth.jwt_secret, allow_dev_secret) {
        (Some(secret), _) => secret.clone(),
        (None, true) => {
            tracing::warn!("No jwt_secret configured, using the development secret");
            DEV_SECRET.to_string()
        }
        (None, false) => anyhow::bail!(
            "No signing secret configured. Set [auth] jwt_secret in config.toml or CHAT_AUTH__JWT_SECRET"
        ),
    };

    Ok(TokenService::with_ttl(
        secret.as_bytes(),
        chrono::Duration::seconds(file_config.auth.token_ttl_secs),
    ))
}

async fn run_server(config: ChatConfig, mut file_config: FileConfig, args: ServeArgs) -> Result<()> {
    let default_directive = if args.debug {
        "chat_realtime=debug,tower_http=debug,info"
    } else {
        "chat_realtime=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting chat realtime server");

    if let Some(port) = args.port {
        file_config.server.port = port;
    }
    if let Some(host) = args.host {
        file_config.server.host = host;
    }

    let tokens = token_service(&file_config, args.dev_secret)?;

    let db = Arc::new(Database::new(&config).await?);
    let stats = db.get_stats().await?;
    info!(
        users = stats.users,
        conversations = stats.conversations,
        participants = stats.participants,
        "Directory loaded"
    );

    let repository = Arc::new(ChatRepository::new(db.pool.clone()));
    let metrics = Arc::new(ServerMetrics::new());
    let realtime_config = RealtimeConfig::from_file(&file_config.realtime);
    info!(
        auth_timeout = ?realtime_config.auth_timeout,
        heartbeat_interval = ?realtime_config.heartbeat_interval,
        send_queue_capacity = realtime_config.send_queue_capacity,
        "Realtime settings"
    );

    let hub = RealtimeHub::new(
        realtime_config,
        repository,
        Arc::new(tokens),
        metrics.clone(),
    );
    hub.start();

    let app_state = AppState {
        hub: hub.clone(),
        db,
        metrics,
    };

    let app = chat_realtime::router(app_state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", file_config.server.host, file_config.server.port)
        .parse::<SocketAddr>()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on {}", listener.local_addr()?);
    info!("  GET /ws                     - Realtime WebSocket");
    info!("  GET /health                 - Health check");
    info!("  GET /metrics                - Server metrics");
    info!("  GET /api/presence           - Online users");
    info!("  GET /api/presence/:user_id  - Single user presence");

    // Upgraded sockets are not tracked by graceful shutdown, so the hub
    // closes them before the listener stops.
    let hub_for_shutdown = hub.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, closing realtime sessions...");
        hub_for_shutdown.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}
