mod auth;
mod backend;
mod config;
mod protocol;
mod registry;
mod server;
mod session;
mod telephony;
mod turn;

use std::sync::Arc;

use backend::GatewayClient;
use config::Config;
use registry::SessionRegistry;
use server::BridgeServer;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--version") => println!("voice-relay {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(run());
        }
    }
}

fn print_usage() {
    println!("voice-relay {VERSION}");
    println!("Telephony Custom LLM bridge for a conversational agent gateway");
    println!();
    println!("Usage: voice-relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --version   Print version");
    println!("  --help, -h  Print this help message");
    println!();
    println!("Without options, starts the bridge server.");
}

async fn run() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay=info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if !config.bridge.enabled {
        tracing::info!("Bridge disabled in config, nothing to do");
        return;
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting voice-relay"
    );

    // The gateway connection is shared by every call; a bridge that can't
    // reach its backend must not come up half-initialized.
    let registry = SessionRegistry::load(config::session_store_path());
    let gateway = Arc::new(GatewayClient::new(
        &config.gateway,
        config.bridge.model.as_deref(),
        registry,
    ));
    if let Err(e) = gateway.connect().await {
        eprintln!("Failed to reach agent gateway: {e}");
        std::process::exit(1);
    }

    let handle = match BridgeServer::new(config, gateway).start().await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to start bridge: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutting down");
    handle.shutdown().await;
}
