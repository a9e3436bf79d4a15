//! eva-gateway: EVA WhatsApp Gateway
//!
//! Usage:
//!   eva-gateway           - Start the webhook server
//!   eva-gateway --help    - Show help
//!   eva-gateway --version - Show version

use eva_core::Config;
use eva_whatsapp::WhatsAppBot;
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    Server,
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_args() {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("eva-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server => {}
    }

    // Load .env file before reading RUST_LOG
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting eva-gateway...");
    tracing::info!(
        port = config.server.port,
        queue = config.queue.enabled,
        remote_tenants = config.tenants.remote.is_some(),
        "{} static tenants configured",
        config.tenants.bots.len() + usize::from(config.tenants.default.is_some())
    );

    let bot = WhatsAppBot::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create WhatsApp bot: {}", e))?;

    tracing::info!("Press Ctrl+C to exit");
    bot.start(shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }

    RunMode::Server
}

fn print_help() {
    println!("eva-gateway - WhatsApp gateway for the EVA conversational platform");
    println!();
    println!("Usage:");
    println!("  eva-gateway           Start the webhook server");
    println!("  eva-gateway --help    Show this help message");
    println!("  eva-gateway --version Show version");
    println!();
    println!("Configuration is read from $EVA_GATEWAY_CONFIG, ./eva-gateway.toml,");
    println!("or the environment:");
    println!("  WHATSAPP_WEBHOOK_TOKEN  Verify token for the subscription handshake (required)");
    println!("  WHATSAPP_APP_SECRET     App secret for payload signatures");
    println!("  WHATSAPP_TOKEN          Graph API access token");
    println!("  EVA_HOST                EVA platform base URL");
    println!("  EVA_CLIENT_ID           EVA client id");
    println!("  EVA_PASSWORD            EVA password");
    println!("  TENANTS_URL             Remote tenant configuration service");
    println!("  TENANTS_API_KEY         API key for the tenant service");
    println!("  PORT                    Webhook port (default: 8080)");
    println!("  QUEUE_ENABLED           Process through the work queue (default: false)");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
