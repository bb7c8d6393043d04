use anyhow::{Context, Result};
use clap::Parser;
use interview_orchestrator::{
    changefeed::{ChangeSink, ChangeSource},
    create_router, AppState, Config, Database, HttpAgentService, LiveKitRoomClient,
    LocalChangeBus, NatsChangeBus, TokenIssuer,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "interview-orchestrator", version, about = "Interview session orchestration service")]
struct Args {
    /// Config file path, without the .toml extension
    #[arg(short, long, default_value = "config/interview-orchestrator")]
    config: String,

    /// Override the HTTP port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }
    cfg.validate()?;
    let cfg = Arc::new(cfg);

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Room service: {}", cfg.livekit.url);
    info!("Agent service: {}", cfg.agent.url);

    let (sink, source): (Arc<dyn ChangeSink>, Arc<dyn ChangeSource>) = match &cfg.nats.url {
        Some(url) => {
            let bus = Arc::new(NatsChangeBus::connect(url, &cfg.nats.subject_prefix).await?);
            let sink: Arc<dyn ChangeSink> = bus.clone();
            (sink, bus as Arc<dyn ChangeSource>)
        }
        None => {
            warn!("No NATS URL configured, change notifications stay in-process");
            let bus = Arc::new(LocalChangeBus::new());
            let sink: Arc<dyn ChangeSink> = bus.clone();
            (sink, bus as Arc<dyn ChangeSource>)
        }
    };

    let db = Database::open(&cfg.storage.database_path, sink)
        .await
        .with_context(|| format!("Failed to open database {}", cfg.storage.database_path))?;
    info!("Database ready at {}", cfg.storage.database_path);

    let tokens = Arc::new(TokenIssuer::from_config(&cfg.livekit)?);
    let rooms = Arc::new(LiveKitRoomClient::from_config(&cfg.livekit, Arc::clone(&tokens))?);
    let agents = Arc::new(HttpAgentService::from_config(&cfg.agent)?);

    let state = AppState::new(Arc::clone(&cfg), tokens, db, rooms, agents, source);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
