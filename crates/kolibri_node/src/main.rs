mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kolibri_core::{KolibriCore, KolibriError};
use tracing::{error, info};

use crate::config::NodeConfig;

#[derive(Parser)]
#[command(name = "kolibri-node")]
#[command(about = "Operator CLI for a Kolibri symbolic-learning core instance")]
struct Cli {
    /// Path to a TOML config file (defaults to ~/.kolibri/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Teach the pool a (question, answer) association.
    Teach {
        question: String,
        answer: String,
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Run one or more evolution generations.
    Tick {
        #[arg(default_value_t = 1)]
        generations: u32,
    },
    /// Print the current best formula as JSON.
    Best,
    /// Gossip the current best formula to the swarm.
    Broadcast,
    /// List known swarm peers.
    Peers,
}

fn run(cli: Cli) -> Result<(), KolibriError> {
    let config_path = cli
        .config
        .unwrap_or_else(|| config::kolibri_data_dir().join("config.toml"));
    let node_config = NodeConfig::load(&config_path);
    let key = node_config.load_or_init_key();

    info!(genome = %node_config.genome_path.display(), bind = %node_config.bind_addr, "starting kolibri-node");

    let mut core = KolibriCore::open(&node_config.genome_path, &key, node_config.seed)?;
    core.attach_swarm(&node_config.bind_addr, node_config.node_id, &key)?;

    match cli.command {
        Commands::Teach { question, answer, source } => {
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            core.ingest_association(&question, &answer, &source, timestamp)?;
            println!("taught: {question:?} -> {answer:?}");
        }
        Commands::Tick { generations } => {
            core.tick(generations);
            let best = core.best_formula();
            println!(
                "{}",
                serde_json::json!({
                    "generations": generations,
                    "profile": {
                        "generation_steps": core.pool().profile().generation_steps,
                        "evaluation_calls": core.pool().profile().evaluation_calls,
                        "last_generation_ms": core.pool().profile().last_generation_ms,
                    },
                    "best_fitness": best.fitness,
                })
            );
        }
        Commands::Best => {
            let best = core.best_formula();
            println!(
                "{}",
                serde_json::json!({
                    "fitness": best.fitness,
                    "gene_digits": best.gene_digits,
                    "embedded_associations": best.embedded_associations.len(),
                })
            );
        }
        Commands::Broadcast => {
            core.broadcast_best()?;
            println!("broadcast sent");
        }
        Commands::Peers => {
            let peers: Vec<_> = core
                .swarm_peers()
                .into_iter()
                .map(|(node_id, addr)| serde_json::json!({"node_id": node_id, "addr": addr.to_string()}))
                .collect();
            println!("{}", serde_json::json!({ "peers": peers }));
        }
    }

    core.close();
    Ok(())
}

fn main() {
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
