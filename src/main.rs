use anyhow::{Context, Result};
use clap::Parser;
use loqa_rooms::{
    create_router, AppState, Config, FileMedia, InMemoryRecords, NatsClassifier, NatsClient, NatsRelay, PeerConnector,
    RoomDeps, WebRtcConnector,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-rooms")]
#[command(about = "Prompt-driven capture rooms over a NATS relay")]
struct Args {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/loqa-rooms")]
    config: String,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Seed a session into the in-memory record store, as ID:CODE:CONDUCTOR
    #[arg(long = "session")]
    sessions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config).context("Failed to load config")?;
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Loqa Rooms v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let nats = NatsClient::connect(&cfg.nats.url).await?;
    let relay = NatsRelay::new(nats.clone(), cfg.nats.subject_prefix.clone());
    let classifier = NatsClassifier::new(nats, cfg.nats.classifier_subject.clone(), cfg.nats.classifier_timeout());
    let media = FileMedia::new(&cfg.media.frames_dir);

    let records = InMemoryRecords::new();
    for seed in &args.sessions {
        let mut parts = seed.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(code), Some(conductor)) => {
                records.create_session(id, code, conductor).await;
            }
            _ => anyhow::bail!("Invalid --session {}, expected ID:CODE:CONDUCTOR", seed),
        }
    }

    let peer = if cfg.peer.enabled {
        info!("Peer link enabled with {} ICE server(s)", cfg.peer.ice_servers.len());
        Some(Arc::new(WebRtcConnector::new(cfg.peer.ice_servers.clone())) as Arc<dyn PeerConnector>)
    } else {
        info!("Peer link disabled");
        None
    };

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let deps = RoomDeps {
        records: Arc::new(records),
        classifier: Arc::new(classifier),
        media: Arc::new(media),
        relay: Arc::new(relay),
        peer,
        config: Arc::new(cfg),
    };

    let app = create_router(AppState::new(deps));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
