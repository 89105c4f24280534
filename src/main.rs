//! coinspro - Command-line client for the Coins Pro WebSocket gateway
//!
//! Runs one-shot remote calls and streams market data or account events.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use coinspro_client::{Client, ClientConfig, ClientError, Envelope, TlsClientConfig};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coinspro")]
#[command(about = "Command-line client for the Coins Pro WebSocket gateway")]
#[command(version)]
struct Cli {
    /// Gateway WebSocket URL (overrides config)
    #[arg(short, long)]
    url: Option<String>,

    /// User id (overrides config)
    #[arg(long)]
    user_id: Option<String>,

    /// API key (overrides config)
    #[arg(long)]
    api_key: Option<String>,

    /// API secret (overrides config)
    #[arg(long)]
    api_secret: Option<String>,

    /// Order management system id
    #[arg(long)]
    oms_id: Option<u64>,

    // ===== TLS Options =====
    /// Path to CA certificate for server verification
    #[arg(long, env = "COINSPRO_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the handshake signature for the configured credentials
    Sign {
        /// Nonce to sign (defaults to the current time in milliseconds)
        #[arg(long)]
        nonce: Option<String>,
    },

    /// Ping the gateway
    Ping,

    /// Call a remote function
    Call {
        /// Function name, e.g. GetProducts
        name: String,

        /// Request body JSON (or @file.json to read from file)
        #[arg(default_value = "{}")]
        body: String,
    },

    /// List instruments
    Instruments,

    /// List products
    Products,

    /// Stream best bid/offer updates for an instrument
    Level1 {
        /// Instrument id
        instrument: u64,
    },

    /// Stream order book updates for an instrument
    Level2 {
        /// Instrument id
        instrument: u64,

        /// Order book depth
        #[arg(long, default_value = "10")]
        depth: u64,
    },

    /// Stream public trades for an instrument
    Trades {
        /// Instrument id
        instrument: u64,

        /// Number of recent trades to include in the snapshot
        #[arg(long, default_value = "0")]
        include_last_count: u64,
    },

    /// Stream events for the authenticated account
    AccountEvents,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    tracing::debug!("Using gateway {} (OMS {})", config.url, config.oms_id);

    // Signing needs no connection
    if let Commands::Sign { nonce } = &cli.command {
        println!("{}", commands::sign(&config, nonce.clone())?);
        return Ok(());
    }

    let client = Client::new(config).map_err(|e| {
        eprintln!("{}: {}", "Invalid configuration".red(), e);
        e
    })?;
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    eprintln!(
        "{} as account {}",
        "Authenticated".green(),
        client.session().account_id().unwrap_or("?").cyan()
    );

    match cli.command {
        Commands::Sign { .. } => unreachable!(), // Already handled above
        Commands::Level1 { instrument } => {
            let events = client.subscribe_level1(instrument)?;
            stream(events, format!("level1 {}", instrument)).await;
            if let Err(e) = client.unsubscribe_level1(instrument).await {
                tracing::warn!("Unsubscribe from level1 {} failed: {}", instrument, e);
            }
        }
        Commands::Level2 { instrument, depth } => {
            let events = client.subscribe_level2(instrument, depth)?;
            stream(events, format!("level2 {}", instrument)).await;
            if let Err(e) = client.unsubscribe_level2(instrument).await {
                tracing::warn!("Unsubscribe from level2 {} failed: {}", instrument, e);
            }
        }
        Commands::Trades {
            instrument,
            include_last_count,
        } => {
            let events = client.subscribe_trades(instrument, include_last_count)?;
            stream(events, format!("trades {}", instrument)).await;
            if let Err(e) = client.unsubscribe_trades(instrument).await {
                tracing::warn!("Unsubscribe from trades {} failed: {}", instrument, e);
            }
        }
        Commands::AccountEvents => {
            let events = client.subscribe_account_events()?;
            stream(events, "account events".to_string()).await;
        }
        cmd => match commands::execute(&client, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                if e.downcast_ref::<ClientError>().is_some_and(ClientError::is_retryable) {
                    eprintln!("{}", "The request may succeed if retried".dimmed());
                }
                client.close();
                std::process::exit(1);
            }
        },
    }

    client.close();
    Ok(())
}

/// Layers command-line flags over the file and environment configuration.
fn build_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = ClientConfig::load()?;

    if let Some(ref url) = cli.url {
        config = config.with_url(url);
    }
    if let Some(ref user_id) = cli.user_id {
        config.credentials.user_id = user_id.clone();
    }
    if let Some(ref api_key) = cli.api_key {
        config.credentials.api_key = api_key.clone();
    }
    if let Some(ref secret) = cli.api_secret {
        config.credentials.api_secret = secret.clone();
    }
    if let Some(oms_id) = cli.oms_id {
        config = config.with_oms_id(oms_id);
    }

    if cli.ca_cert.is_some() || cli.insecure {
        let mut tls = TlsClientConfig::new();
        if let Some(ref path) = cli.ca_cert {
            tls = tls.with_ca_cert(path);
        }
        if cli.insecure {
            tls = tls.with_insecure();
        }
        config = config.with_tls(tls);
    }

    Ok(config)
}

/// Prints one JSON line per event until Ctrl+C or the session closes.
async fn stream(mut events: UnboundedReceiver<Envelope>, label: String) {
    eprintln!("{} {}", "Streaming".green(), label.cyan());
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(e) => match serde_json::to_string(&e) {
                        Ok(json) => println!("{}", json),
                        Err(err) => eprintln!("{}: {}", "Warning".yellow(), err),
                    },
                    None => {
                        eprintln!("{}", "Session closed".red());
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping stream...".dimmed());
                break;
            }
        }
    }
}
