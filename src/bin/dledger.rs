//! CLI entry point. Grounded in
//! `examples/original_source/cmd/dledger/main.go`'s port/peers.txt
//! handling, translated into `clap`-derived flags.
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use hashgraph::address::{Address, Roster};
use hashgraph::config::NodeConfig;
use hashgraph::node::Node;

/// Runs a hashgraph node.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// This node's own `host:port`, must appear in the roster file.
    #[arg(long)]
    listen: String,

    /// Path to the roster file (`host:port name` lines).
    #[arg(long, default_value = "peers.txt")]
    peers: PathBuf,

    /// Gossip interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    gossip_interval_ms: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let local = Address::new(args.listen);

    let roster = match Roster::load(&args.peers, local) {
        Ok(roster) => roster,
        Err(err) => {
            eprintln!("failed to load roster: {err}");
            std::process::exit(1);
        }
    };

    let mut config = NodeConfig::new(roster.local().clone(), args.peers.clone());
    config.gossip_interval = Duration::from_millis(args.gossip_interval_ms);

    let node = Node::new(roster, config);
    node.wait_for_peers(Duration::from_secs(1));

    if let Err(err) = node.start() {
        eprintln!("failed to start node: {err}");
        std::process::exit(1);
    }

    loop {
        std::thread::park();
    }
}
