//! wflink-connector: workflow platform calculation member
//!
//! Joins the platform's event stream, answers processor and criteria
//! requests, and serves health and metrics. The `search` subcommand runs a
//! single snapshot search and prints the results as JSON lines.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wflink_connector_lib::{
    run_server, ConnectionManager, ConnectionMonitor, EventRouter, ExecutionPools, HandlerError,
    HandlerRegistry, ListenerRegistry, Processor, ReconnectionStrategy, ServerState,
};
use wflink_metadata::{AuthConfig, Settings};
use wflink_middleware::{token_provider_from_config, Transport, WebSocketTransport};
use wflink_search::{HttpSearchApi, PageRequest, QueryCondition, SearchRequest, SnapshotSearchClient};
use wflink_wire::{Codec, ProcessorRequest};

#[derive(Parser, Debug)]
#[command(name = "wflink-connector")]
#[command(about = "Calculation member client for the workflow platform")]
struct Args {
    /// Path to the YAML settings file; defaults apply when omitted
    #[arg(short, long, env = "WFLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "WFLINK_HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    health_addr: String,

    /// Override platform.ws_url
    #[arg(long, env = "WFLINK_WS_URL")]
    ws_url: Option<String>,

    /// Override platform.api_url
    #[arg(long, env = "WFLINK_API_URL")]
    api_url: Option<String>,

    /// Static bearer token, replaces the configured auth
    #[arg(long, env = "WFLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "WFLINK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the platform and serve calculation requests (default)
    Run,
    /// Run one snapshot search
    Search {
        #[arg(long)]
        model: String,
        #[arg(long, default_value_t = 1)]
        version: u32,
        /// Condition tree as JSON
        #[arg(long)]
        condition: String,
        #[arg(long, default_value_t = 100)]
        page_size: u32,
        #[arg(long, default_value_t = 0)]
        page_number: u32,
        /// Evaluate directly instead of building a snapshot
        #[arg(long)]
        in_memory: bool,
    },
}

/// Returns the request payload unchanged
struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, request: &ProcessorRequest) -> Result<Value, HandlerError> {
        Ok(request.payload.clone())
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };

    if let Some(url) = &args.ws_url {
        settings.platform.ws_url = url.clone();
    }
    if let Some(url) = &args.api_url {
        settings.platform.api_url = url.clone();
    }
    if let Some(token) = &args.token {
        settings.auth = AuthConfig::Static {
            token: token.clone(),
        };
    }
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let settings = load_settings(&args)?;
    info!(
        source = %settings.platform.source,
        ws_url = %settings.platform.ws_url,
        "Loaded settings"
    );

    match args.command {
        None | Some(Command::Run) => {
            let health_addr: SocketAddr = args
                .health_addr
                .parse()
                .with_context(|| format!("invalid health address {}", args.health_addr))?;
            run(settings, health_addr).await
        }
        Some(Command::Search {
            model,
            version,
            condition,
            page_size,
            page_number,
            in_memory,
        }) => {
            let condition: QueryCondition =
                serde_json::from_str(&condition).context("parsing --condition")?;
            let mut request = SearchRequest::new(model, version, condition);
            if in_memory {
                request = request.in_memory();
            }
            search(&settings, request, PageRequest::new(page_size, page_number)).await
        }
    }
}

async fn run(settings: Settings, health_addr: SocketAddr) -> anyhow::Result<()> {
    let tokens = token_provider_from_config(&settings.auth)?;
    let transport: Arc<dyn Transport> = Arc::new(
        WebSocketTransport::new(&settings.platform.ws_url, tokens)
            .with_write_timeout(settings.platform.write_timeout()),
    );

    // Leaf-first: codec, pools, router, monitor, reconnection, manager
    let codec = Codec::new(settings.platform.source.clone());
    let pools = Arc::new(ExecutionPools::from_config(&settings.pools)?);
    let router = Arc::new(EventRouter::new(codec.clone(), Arc::clone(&pools)));
    let monitor = Arc::new(ConnectionMonitor::new(
        settings.monitor.clone(),
        Arc::clone(&transport),
        Arc::new(ListenerRegistry::new()),
    ));
    let reconnect = Arc::new(ReconnectionStrategy::new(settings.reconnect.clone()));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register_processor("echo", Arc::new(EchoProcessor));

    let manager = ConnectionManager::new(
        transport,
        codec,
        router,
        Arc::clone(&monitor),
        reconnect,
        handlers,
        &settings.platform,
    );

    let cancel = CancellationToken::new();
    let monitor_task = Arc::clone(&monitor).spawn(cancel.clone());
    let state = ServerState::new(settings.platform.source.clone(), Arc::clone(&monitor));
    let mut server = tokio::spawn(run_server(health_addr, state, cancel.clone()));
    info!(addr = %health_addr, "Health server started");

    manager.start().await;

    let mut server_failed = false;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for shutdown signal")?;
            info!("Received shutdown signal");
        }
        res = &mut server => {
            server_failed = true;
            match res {
                Ok(Ok(())) => error!("Health server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task panicked"),
            }
        }
    }

    manager.shutdown().await;
    pools.shutdown().await;
    cancel.cancel();
    if let Err(e) = monitor_task.await {
        error!(error = %e, "Monitor task panicked");
    }
    if !server_failed {
        match server.await {
            Ok(Err(e)) => error!(error = %e, "Health server failed"),
            Err(e) => error!(error = %e, "Health server task panicked"),
            Ok(Ok(())) => {}
        }
    }
    info!("Shutdown complete");

    if server_failed {
        anyhow::bail!("health server stopped");
    }
    Ok(())
}

async fn search(settings: &Settings, request: SearchRequest, page: PageRequest) -> anyhow::Result<()> {
    let tokens = token_provider_from_config(&settings.auth)?;
    let api = HttpSearchApi::new(&settings.platform.api_url, tokens, &settings.search)?;
    let client = SnapshotSearchClient::new(Arc::new(api), &settings.search);

    let items = client.search(&request, page).await?;
    info!(model = %request.model, results = items.len(), "Search finished");
    for item in items {
        println!("{}", serde_json::to_string(&item)?);
    }
    Ok(())
}
