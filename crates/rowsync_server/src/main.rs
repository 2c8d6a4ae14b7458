//! rowsync server
//!
//! Serves the row-level sync protocol over HTTP.
//!
//! # Access
//!
//! - users named by `--admin` may create and delete tables and see every row
//! - every other user may synchronize the rows their filter scopes grant
//!   (or only read them with `--read-only`)

use clap::{Parser, ValueEnum};
use rowsync_engine::{AclTable, DelayStrategy, EngineConfig, LockConfig, Role};
use rowsync_protocol::Scope;
use rowsync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Row-level sync server.
#[derive(Parser)]
#[command(name = "rowsync-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Journal file; state is kept in memory when omitted
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// User granted table administration (repeatable)
    #[arg(long)]
    admin: Vec<String>,

    /// Grant other users read access only
    #[arg(long)]
    read_only: bool,

    /// Rows per page when a request names no limit
    #[arg(long, default_value = "100")]
    fetch_limit: usize,

    /// Largest page a request may ask for
    #[arg(long, default_value = "1000")]
    max_fetch_limit: usize,

    /// Back-off between table lock attempts
    #[arg(long, value_enum, default_value = "short")]
    lock_delay: LockDelay,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LockDelay {
    Short,
    Medium,
    Long,
}

impl From<LockDelay> for DelayStrategy {
    fn from(delay: LockDelay) -> Self {
        match delay {
            LockDelay::Short => DelayStrategy::Short,
            LockDelay::Medium => DelayStrategy::Medium,
            LockDelay::Long => DelayStrategy::Long,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = EngineConfig::new()
        .with_default_fetch_limit(cli.fetch_limit)
        .with_max_fetch_limit(cli.max_fetch_limit)
        .with_lock(LockConfig::default().with_strategy(cli.lock_delay.into()));
    let mut config = ServerConfig::new(cli.bind).with_engine(engine);
    if let Some(path) = cli.data {
        config = config.with_data_path(path);
    }

    let default_role = if cli.read_only {
        Role::Reader
    } else {
        Role::Synchronize
    };
    let acl = AclTable::new().with_grant(Scope::Default, default_role);
    for user in cli.admin {
        acl.grant(Scope::User(user), Role::Administer);
    }

    SyncServer::open(config, Arc::new(acl))?.run().await?;
    Ok(())
}
