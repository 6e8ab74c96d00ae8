//! starknetid CLI — validate configuration, inspect stream state, decode labels.
//!
//! # Commands
//! ```text
//! starknetid info
//! starknetid check-config -c config.yml
//! starknetid status       -c config.yml [--json]
//! starknetid decode       0x6b2e 0x15d246f6c1b
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use starknetid_core::felt::Felt;
use starknetid_core::label;
use starknetid_core::storage::NamingStorage;
use starknetid_indexer::{init_tracing, IndexerConfig};
use starknetid_storage::{PostgresOptions, PostgresStorage};

#[derive(Parser)]
#[command(
    name = "starknetid",
    about = "StarknetId naming indexer tools",
    long_about = "
Tools for the StarknetId naming indexer.

ENVIRONMENT VARIABLES:
  DATABASE_URL    Overrides database.url from the config file
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show indexer defaults and capabilities
    Info,

    /// Load and validate a config file
    #[command(name = "check-config")]
    CheckConfig {
        /// Path to the YAML config
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List persisted stream checkpoints
    Status {
        /// Path to the YAML config
        #[arg(short, long)]
        config: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode encoded label felts and join them into a domain
    Decode {
        /// Felts, hex (0x-prefixed) or decimal
        #[arg(required = true, num_args = 1..)]
        felts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::CheckConfig { config } => cmd_check_config(&config),
        Commands::Status { config, json } => cmd_status(&config, json).await,
        Commands::Decode { felts } => cmd_decode(&felts),
    }
}

fn load_config(path: &Path) -> Result<IndexerConfig> {
    let mut config = IndexerConfig::load(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }
    config.validate().context("invalid config")?;
    Ok(config)
}

fn cmd_info() -> Result<()> {
    let defaults = IndexerConfig::default();
    println!("starknetid v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Root domain:                .{}", label::ROOT_DOMAIN);
    println!("  Channel queue capacity:     {}", defaults.channel_capacity);
    println!("  Resubscribe poll interval:  {} ms", defaults.resubscribe_poll_ms);
    println!("  Resolver cache:             1000 entries, 1 h TTL");
    println!("  Storage backends:           memory, PostgreSQL");
    println!("  Events:                     Transfer, VerifierDataUpdate, domain_to_addr_update,");
    println!("                              addr_to_domain_update, starknet_id_update,");
    println!("                              domain_transfer, domain_to_resolver_update");
    Ok(())
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("✓ {} is valid", path.display());
    for (name, sub) in &config.subscriptions {
        println!(
            "  {name}: {} event filter(s), {} address filter(s)",
            sub.events.len(),
            sub.addresses.len()
        );
    }
    if !config.subdomains.is_empty() {
        println!("  {} static subdomain(s)", config.subdomains.len());
    }
    Ok(())
}

async fn cmd_status(path: &Path, json: bool) -> Result<()> {
    let config = load_config(path)?;
    init_tracing(&config.log).context("initializing logging")?;

    let opts = PostgresOptions {
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connect_timeout_secs: config.database.connect_timeout_secs,
    };
    let storage = PostgresStorage::connect_with_options(&config.database.url, opts)
        .await
        .context("connecting to database")?;
    let states = storage.list_states().await.context("listing stream states")?;
    debug!(count = states.len(), "loaded stream states");

    if json {
        let rows: Vec<_> = states
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "last_height": s.last_height,
                    "last_time": s.last_time.map(|t| t.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if states.is_empty() {
        println!("no persisted streams");
    }
    for s in &states {
        let time = s
            .last_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let configured = if config.subscriptions.contains_key(&s.name) {
            ""
        } else {
            " (not configured)"
        };
        println!("{:<24} height {:>10}  at {time}{configured}", s.name, s.last_height);
    }
    Ok(())
}

fn cmd_decode(felts: &[String]) -> Result<()> {
    let felts = felts
        .iter()
        .map(|s| Felt::parse(s).with_context(|| format!("parsing {s}")))
        .collect::<Result<Vec<_>>>()?;
    let labels = label::decode_segments(&felts).context("decoding labels")?;
    println!("{}.{}", labels.join("."), label::ROOT_DOMAIN);
    Ok(())
}
