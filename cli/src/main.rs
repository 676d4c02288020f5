//! opindex CLI — run the EntryPoint indexer and inspect what it stored.
//!
//! # Commands
//! ```text
//! opindex run    --rpc-url <url> [--ws-url <url>] [--start-block <n>] [--database-url <url>]
//! opindex query  --database-url <url> [--sender <addr>] [--paymaster <addr>] ...
//! opindex status --database-url <url> [--id <indexer>]
//! opindex reset  --database-url <url> [--id <indexer>]
//! opindex info
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use opindex_core::{IndexerConfig, UserOpFilter, DEFAULT_ENTRYPOINT};
use opindex_evm::{EvmClientConfig, IndexerBuilder};

mod logging;
mod storage;

use logging::LogConfig;

#[derive(Parser)]
#[command(
    name = "opindex",
    about = "ERC-4337 UserOperationEvent indexer",
    long_about = "
opindex: backfills and live-follows UserOperationEvent logs of an ERC-4337
EntryPoint contract into SQLite, PostgreSQL or memory.

ENVIRONMENT VARIABLES:
  ETH_RPC_URL          HTTP JSON-RPC endpoint
  ETH_WS_URL           WebSocket endpoint for eth_subscribe (optional)
  ENTRYPOINT_ADDRESS   Contract to index (default: EntryPoint v0.7)
  START_BLOCK          First block when no checkpoint exists
  DATABASE_URL         postgres://…, sqlite:… or a file path; memory if unset
  RUST_LOG             Overrides --log-level / --log-component
",
    version
)]
struct Cli {
    /// Global log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Per-component override, e.g. opindex_evm=debug (repeatable)
    #[arg(long = "log-component", global = true, value_name = "COMPONENT=LEVEL")]
    log_components: Vec<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DbArgs {
    /// Storage location; in-memory when omitted
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// HTTP JSON-RPC endpoint
    #[arg(long, env = "ETH_RPC_URL")]
    rpc_url: String,
    /// WebSocket endpoint; HTTP filter polling is used without one
    #[arg(long, env = "ETH_WS_URL")]
    ws_url: Option<String>,
    /// EntryPoint contract address
    #[arg(long, env = "ENTRYPOINT_ADDRESS", default_value = DEFAULT_ENTRYPOINT)]
    contract: String,
    /// Indexer id (checkpoint key)
    #[arg(long, env = "INDEXER_ID", default_value = "entrypoint-v07")]
    id: String,
    /// First block to index when no checkpoint exists
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    start_block: u64,
    /// Blocks per eth_getLogs call
    #[arg(long, default_value_t = 1000)]
    batch_size: u64,
    /// Blocks behind head that backfill leaves to the live feed
    #[arg(long, default_value_t = 0)]
    confirmation_depth: u64,
    /// Delay before retrying a lost or failed subscription
    #[arg(long, env = "RECONNECT_INTERVAL_MS", default_value_t = 30_000)]
    reconnect_interval_ms: u64,
    /// Log filter polling interval when no WebSocket endpoint is set
    #[arg(long, default_value_t = 2_000)]
    poll_interval_ms: u64,
    #[command(flatten)]
    db: DbArgs,
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long)]
    user_op_hash: Option<String>,
    #[arg(long)]
    sender: Option<String>,
    #[arg(long)]
    paymaster: Option<String>,
    #[arg(long)]
    success: Option<bool>,
    #[arg(long)]
    block_number: Option<u64>,
    #[arg(long)]
    nonce: Option<String>,
    /// Decimal wei
    #[arg(long)]
    actual_gas_cost: Option<String>,
    #[arg(long)]
    actual_gas_used: Option<String>,
    #[arg(long)]
    transaction_hash: Option<String>,
    /// Exact stored indexing time (RFC 3339, milliseconds, UTC)
    #[arg(long)]
    timestamp: Option<String>,
    /// Print only the number of matches
    #[arg(long)]
    count: bool,
    #[command(flatten)]
    db: DbArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill from the checkpoint, then follow new events until Ctrl-C
    Run(RunArgs),

    /// Print indexed user operations matching the given fields as JSON
    Query(QueryArgs),

    /// Show the checkpoint and stored event count
    Status {
        #[arg(long, default_value = "entrypoint-v07")]
        id: String,
        #[command(flatten)]
        db: DbArgs,
    },

    /// Delete an indexer's checkpoint so the next run starts from --start-block
    Reset {
        #[arg(long, default_value = "entrypoint-v07")]
        id: String,
        #[command(flatten)]
        db: DbArgs,
    },

    /// Show defaults and capabilities
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log = LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..Default::default()
    }
    .with_overrides(&cli.log_components)?;
    logging::init_tracing(&log);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Query(args) => cmd_query(args).await,
        Commands::Status { id, db } => cmd_status(&id, db).await,
        Commands::Reset { id, db } => cmd_reset(&id, db).await,
        Commands::Info => cmd_info(),
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(args: RunArgs) -> Result<()> {
    let backend = storage::open(args.db.database_url.as_deref()).await?;
    if !backend.is_persistent() {
        warn!("no DATABASE_URL given; indexed events are kept in memory only");
    }

    let mut builder = IndexerBuilder::new()
        .id(args.id)
        .contract(args.contract)
        .start_block(args.start_block)
        .batch_size(args.batch_size)
        .confirmation_depth(args.confirmation_depth)
        .reconnect_interval_ms(args.reconnect_interval_ms)
        .rpc_url(args.rpc_url)
        .poll_interval_ms(args.poll_interval_ms);
    if let Some(ws) = args.ws_url {
        builder = builder.ws_url(ws);
    }

    let orchestrator = builder
        .build(backend.sink.clone(), backend.checkpoints.clone())
        .context("invalid indexer configuration")?;

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; shutting down");
            shutdown.cancel();
        }
    });

    orchestrator.run().await.context("indexer stopped")?;
    Ok(())
}

impl QueryArgs {
    fn filter(&self) -> Result<UserOpFilter> {
        let filter = UserOpFilter {
            user_op_hash: self.user_op_hash.clone(),
            sender: self.sender.clone(),
            paymaster: self.paymaster.clone(),
            success: self.success,
            block_number: self.block_number,
            nonce: self.nonce.clone(),
            actual_gas_cost: self.actual_gas_cost.clone(),
            actual_gas_used: self.actual_gas_used.clone(),
            transaction_hash: self.transaction_hash.clone(),
            timestamp: self.timestamp.clone(),
        };
        filter.validate()?;
        Ok(filter)
    }
}

async fn cmd_query(args: QueryArgs) -> Result<()> {
    let filter = args.filter()?;
    let backend = persistent(args.db).await?;
    let events = backend.query.find(&filter).await?;
    if args.count {
        println!("{}", events.len());
    } else {
        println!("{}", serde_json::to_string_pretty(&events)?);
    }
    Ok(())
}

async fn cmd_status(id: &str, db: DbArgs) -> Result<()> {
    let backend = persistent(db).await?;
    let checkpoint = backend.checkpoints.load(id).await?;
    let events = backend.query.count().await?;

    println!("Indexer:     {id}");
    println!("Backend:     {}", backend.kind);
    match checkpoint {
        Some(cp) => {
            println!("Checkpoint:  block {}", cp.block_number);
            println!("Updated at:  {} (unix)", cp.updated_at);
        }
        None => println!("Checkpoint:  none"),
    }
    println!("Events:      {events}");
    Ok(())
}

async fn cmd_reset(id: &str, db: DbArgs) -> Result<()> {
    let backend = persistent(db).await?;
    backend.checkpoints.delete(id).await?;
    println!("Checkpoint for '{id}' deleted");
    Ok(())
}

async fn persistent(db: DbArgs) -> Result<storage::Backend> {
    if db.database_url.is_none() {
        bail!("--database-url (or DATABASE_URL) is required for this command");
    }
    storage::open(db.database_url.as_deref()).await
}

fn cmd_info() -> Result<()> {
    let indexer = IndexerConfig::default();
    let client = EvmClientConfig::default();

    println!("opindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  Contract:            {DEFAULT_ENTRYPOINT} (EntryPoint v0.7)");
    println!("  Batch size:          {} blocks/call", indexer.batch_size);
    println!("  Reconnect interval:  {} ms", indexer.reconnect_interval_ms);
    println!("  Poll interval:       {} ms (HTTP filter mode)", client.poll_interval_ms);
    println!("  Confirmation depth:  {}", indexer.confirmation_depth);
    println!();
    println!("Storage backends:      memory, SQLite, PostgreSQL");
    println!("Live transports:       eth_subscribe (WebSocket), eth_newFilter polling (HTTP)");
    Ok(())
}
