use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use radio24_core::config::{Config, MediaMode, Service};
use radio24_core::submission::JsonlSubmissionStore;
use radio24_core::token::TokenMinter;
use radio24_director::{Director, DirectorState, HttpProgramSink, Schedule, start_director};
use radio24_gateway::{GatewayState, Hub, start_gateway};
use radio24_host::{
    HostState, HttpGatewayLink, MediaSupervisor, ModeController, Monologue, PromptBoard,
    QueuePoller, Speaker, start_host,
};
use radio24_media::MediaConnector;
use radio24_media::realtime::{OpenAiRealtime, RealtimeConnector};
use radio24_media::relay::RelayConnector;
use radio24_media::room::SilentConnector;
use radio24_providers::OpenAiProvider;

#[derive(Parser)]
#[command(
    name = "radio24",
    about = "24-hour AI radio station: listener gateway, program director and on-air host",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the listener-facing gateway
    Gateway {
        /// Port to listen on (default: $PORT or 8080)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Start the program director
    Director {
        /// Port to listen on (default: $PORT or 8081)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Start the on-air host
    Host {
        /// Port to listen on (default: $HOST_PORT, $PORT or 8082)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Mint a subscribe-only listener token
    Token {
        #[arg(long)]
        identity: String,
    },

    /// Show resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Arc::new(Config::from_env()?);

    match cli.command {
        Commands::Gateway { port } => {
            let port = port.unwrap_or_else(|| config.port_for(Service::Gateway));
            run_gateway(config, port, shutdown_token()).await?;
        }
        Commands::Director { port } => {
            let port = port.unwrap_or_else(|| config.port_for(Service::Director));
            run_director(config, port, shutdown_token()).await?;
        }
        Commands::Host { port } => {
            let port = port.unwrap_or_else(|| config.port_for(Service::Host));
            run_host(config, port, shutdown_token()).await?;
        }
        Commands::Token { identity } => {
            let minter = TokenMinter::new(&config.livekit.api_key, &config.livekit.api_secret);
            let join = minter.join(&identity, &config.livekit.url)?;
            println!("{}", serde_json::to_string_pretty(&join)?);
        }
        Commands::Status => {
            println!("radio24 v{}", env!("CARGO_PKG_VERSION"));
            println!("Gateway port: {}", config.port_for(Service::Gateway));
            println!("Director port: {}", config.port_for(Service::Director));
            println!("Host port: {}", config.port_for(Service::Host));
            println!(
                "Providers: {}",
                if config.openai.api_key.is_some() { "online" } else { "offline" }
            );
            println!("{}", serde_json::to_string_pretty(&*config)?);
        }
    }

    Ok(())
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutting down");
        trigger.cancel();
    });
    cancel
}

async fn run_gateway(config: Arc<Config>, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let provider = Arc::new(OpenAiProvider::new(&config.openai)?);
    if provider.is_offline() {
        warn!("OPENAI_API_KEY not set, embeddings use the local hashing fallback");
    }
    let store = Arc::new(JsonlSubmissionStore::new(config.data_dir.join("submissions")));
    let hub = Hub::spawn(cancel.clone());
    let state = GatewayState::new(config.clone(), hub, store, provider.clone(), provider)?;

    info!(port, "Starting radio24 gateway");
    start_gateway(Arc::new(state), port, cancel).await
}

async fn run_director(config: Arc<Config>, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let schedule = Schedule::load_or_default(&config.data_dir.join("schedule.json")).await;
    let sink = Arc::new(HttpProgramSink::new(&config.peers)?);
    let (director, dispatcher) = Director::new(schedule, config.segment_duration(), sink.clone());
    let ticker = director.start(cancel.clone());

    let state = DirectorState {
        director,
        sink,
        allowed_origin: config.http.allowed_origin.clone(),
    };
    info!(port, segment_minutes = config.director.segment_minutes, "Starting radio24 director");
    let served = start_director(state, port, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = ticker.await {
        warn!(%e, "Director ticker ended abnormally");
    }
    dispatcher.abort();
    served
}

async fn run_host(config: Arc<Config>, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let provider = Arc::new(OpenAiProvider::new(&config.openai)?);
    let realtime: Option<Arc<dyn RealtimeConnector>> = match &config.openai.api_key {
        Some(key) => Some(Arc::new(OpenAiRealtime::new(&config.openai.realtime_url, key))),
        None => {
            warn!("OPENAI_API_KEY not set, running in test mode without speech");
            None
        }
    };
    let gateway = Arc::new(
        HttpGatewayLink::new(&config.peers.gateway_base).context("building gateway client")?,
    );

    let mode = ModeController::spawn(gateway.clone(), realtime, config.host.gain, cancel.clone());

    let connector: Arc<dyn MediaConnector> = match config.host.media {
        MediaMode::Relay => {
            let minter = TokenMinter::new(&config.livekit.api_key, &config.livekit.api_secret);
            Arc::new(RelayConnector::new(&config.host.relay_url, minter))
        }
        MediaMode::Silent => Arc::new(SilentConnector),
    };
    tokio::spawn(MediaSupervisor::new(connector, mode.clone()).run(cancel.clone()));

    let board = Arc::new(PromptBoard::default());
    let speaker = Arc::new(Speaker::new(mode.clone(), provider.clone(), gateway.clone()));
    let monologue = Arc::new(Monologue::new(
        mode.clone(),
        speaker.clone(),
        provider.clone(),
        board.clone(),
        config.monologue_period(),
    ));
    tokio::spawn(monologue.run(cancel.clone()));
    tokio::spawn(QueuePoller::new(gateway, mode.clone(), config.poll_period()).run(cancel.clone()));

    let state = HostState {
        mode,
        board,
        speaker,
        script: provider,
        allowed_origin: config.http.allowed_origin.clone(),
    };
    info!(port, media = ?config.host.media, "Starting radio24 host");
    start_host(state, port, cancel).await
}
