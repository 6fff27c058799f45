//! # chronicle
//!
//! Operator tool for a chronicle event log in Postgres: verify the checksum
//! chain, inspect recent events and read or reset the shared checkpoint.
//!
//! Apply cycles are run by the host process, which owns the aggregate
//! repositories.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tokio::runtime::Handle;

use chronicle_core::EventId;
use chronicle_events::verify_chain_from;
use chronicle_infra::checkpoint::{
    checkpoint_key, CheckpointStore, PostgresCheckpointStore, RedisCheckpointStore, RESET_SENTINEL,
};
use chronicle_infra::config::{ProjectorConfig, DEFAULT_BATCH_SIZE};
use chronicle_infra::event_store::PostgresEventStore;

#[derive(Parser, Debug)]
#[command(name = "chronicle", about = "Event log maintenance")]
struct Cli {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Read and write the checkpoint in Redis instead of Postgres.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Deployment environment (checkpoint key suffix). Defaults to CHRONICLE_ENV.
    #[arg(long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute the checksum chain over the whole log.
    Verify {
        /// Events read per query.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        page_size: usize,
    },
    /// Print the newest events as JSON lines.
    Recent {
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
    /// Show the shared checkpoint.
    Checkpoint,
    /// Force every projector to rescan the log on its next cycle.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    chronicle_observability::init();
    let cli = Cli::parse();

    let pool = PgPool::connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let environment = cli
        .env
        .unwrap_or_else(|| ProjectorConfig::from_env().environment);
    let key = checkpoint_key(&environment);

    match cli.command {
        Command::Verify { page_size } => {
            let store = PostgresEventStore::new(pool, Handle::current());
            verify(&store, page_size.max(1)).await
        }
        Command::Recent { n } => {
            let store = PostgresEventStore::new(pool, Handle::current());
            for event in store.load_recent(n).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Command::Checkpoint => {
            let value = match &cli.redis_url {
                Some(url) => RedisCheckpointStore::new(url)?.get(&key)?,
                None => {
                    PostgresCheckpointStore::new(pool, Handle::current())
                        .read(&key)
                        .await?
                }
            };
            match value {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} is not set"),
            }
            Ok(())
        }
        Command::Reset => {
            match &cli.redis_url {
                Some(url) => RedisCheckpointStore::new(url)?.set(&key, RESET_SENTINEL)?,
                None => {
                    PostgresCheckpointStore::new(pool, Handle::current())
                        .write(&key, RESET_SENTINEL)
                        .await?
                }
            }
            tracing::info!(key = %key, "checkpoint reset; next cycle rescans the log");
            println!("{key} = {RESET_SENTINEL}");
            Ok(())
        }
    }
}

async fn verify(store: &PostgresEventStore, page_size: usize) -> Result<()> {
    let mut after = EventId::ZERO;
    let mut previous: Option<String> = None;
    let mut verified = 0usize;

    loop {
        let page = store.load_after(after, None, page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        match verify_chain_from(previous.as_deref(), &page) {
            Ok(n) => verified += n,
            Err(chain_break) => {
                tracing::error!(event_id = %chain_break.event_id(), "checksum chain broken");
                bail!("chain broken after {verified} verified events: {chain_break}");
            }
        }
        after = last.id;
        previous = last.checksum.clone();
    }

    println!("checksum chain intact: {verified} events");
    Ok(())
}
