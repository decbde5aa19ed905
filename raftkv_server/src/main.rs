//! Server executable: boots one replica of a Raft-replicated key-value
//! cluster and runs it until interrupted.

use clap::Parser;
use tokio::sync::oneshot;

use raftkv::utils::{logger_init, set_me};
use raftkv::{RaftConfig, RaftError, RaftReplica, ReplicaId};

/// One replica in a raftkv cluster.
#[derive(Parser, Debug)]
#[command(name = "raftkv_server", about = "Raft-replicated key-value store server")]
struct Args {
    /// This replica's id; must be in `0..population`.
    id: ReplicaId,

    /// TOML string overlaying the default `RaftConfig` (e.g.
    /// `"population = 3, heartbeat_period_ms = 200"`).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), RaftError> {
    let args = Args::parse();
    logger_init();
    set_me(format!("Server{}", args.id));

    let config = RaftConfig::parse(args.config.as_deref())?;
    let replica = RaftReplica::new_and_setup(args.id, config).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut shutdown_tx = Some(shutdown_tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = shutdown_tx.take() {
            let _ = tx.send(());
        }
    })
    .expect("failed to install Ctrl-C handler");

    tokio::select! {
        _ = replica.run() => {}
        _ = shutdown_rx => {
            log::info!("received interrupt, shutting down");
        }
    }

    Ok(())
}
