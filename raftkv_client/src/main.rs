//! Client executable: sends one command to a raftkv cluster, following
//! leader redirects, and prints the result.

use clap::Parser;

use raftkv::client::KvEndpoint;
use raftkv::utils::logger_init;
use raftkv::RaftError;

/// Sends a single `SET`/`GET`/`DELETE` command to a raftkv cluster.
#[derive(Parser, Debug)]
#[command(name = "raftkv_client", about = "Raft-replicated key-value store client")]
struct Args {
    /// Cluster size, used to derive the server address table.
    #[arg(short, long, default_value_t = 5)]
    population: u8,

    /// Command tokens, e.g. `SET x 1` or `GET x`.
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), RaftError> {
    logger_init();
    let args = Args::parse();
    let command = args.command.join(" ");

    let mut endpoint = KvEndpoint::new(args.population);
    let reply = endpoint.request(&command).await?;
    println!("{}", reply);
    Ok(())
}
