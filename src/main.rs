use std::path::PathBuf;

use anyhow::Context;
use chandy_bank::{
    common::telemetry::init_tracing,
    network::FileRegistry,
    BranchConfig, Observer, ObserverConfig, RunningBranch,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chandy-bank", about = "Bank branches with Chandy-Lamport global snapshots")]
struct Cli {
    /// JSON config file. Flags override its fields.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one branch. Type `s` and Enter to start a global snapshot.
    Branch(BranchArgs),
    /// Run the observer that prints matched transfers and global snapshots.
    Observer(ObserverArgs),
}

#[derive(Parser, Debug)]
struct BranchArgs {
    #[arg(long)]
    balance: Option<i64>,
    #[arg(long)]
    listen: Option<String>,
    #[arg(long)]
    observer: Option<String>,
    #[arg(long)]
    registry: Option<String>,
    #[arg(long)]
    branches: Option<usize>,
    /// Successful sends per peer before the sender stops. 0 disables transfers.
    #[arg(long)]
    max_sends: Option<u64>,
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[derive(Parser, Debug)]
struct ObserverArgs {
    #[arg(long)]
    listen: Option<String>,
    #[arg(long)]
    branches: Option<usize>,
    #[arg(long)]
    money_unit: Option<String>,
    /// Clear this registry file before branches start registering.
    #[arg(long)]
    reset_registry: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Branch(args) => run_branch(cli.config, args).await,
        Command::Observer(args) => run_observer(cli.config, args).await,
    }
}

async fn run_branch(path: Option<PathBuf>, args: BranchArgs) -> anyhow::Result<()> {
    let mut config = match path {
        Some(path) => BranchConfig::from_file(&path)
            .with_context(|| format!("loading branch config from {}", path.display()))?,
        None => BranchConfig::default(),
    };
    if let Some(balance) = args.balance {
        config.initial_balance = balance;
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(observer) = args.observer {
        config.observer_addr = observer;
    }
    if let Some(registry) = args.registry {
        config.registry_path = registry;
    }
    if let Some(branches) = args.branches {
        config.n_branches = branches;
    }
    if let Some(max_sends) = args.max_sends {
        config.transfer.max_sends = Some(max_sends);
    }
    if let Some(tick_ms) = args.tick_ms {
        config.transfer.tick_ms = tick_ms;
    }

    let registry = FileRegistry::new(&config.registry_path)
        .with_context(|| format!("opening registry {}", config.registry_path))?;
    let running = RunningBranch::launch(&config, &registry)
        .await
        .context("starting branch")?;
    let handle = running.handle();
    info!(branch = handle.id(), "ready; type `s` to take a global snapshot");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) if line.trim_start().starts_with('s') => {
                    if let Err(err) = handle.initiate_snapshot().await {
                        warn!(branch = handle.id(), error = %err, "snapshot not started");
                    }
                }
                Some(_) => {}
                // Stdin closed; keep running until interrupted.
                None => {
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for ctrl-c")?;
                break;
            }
        }
    }

    info!(branch = handle.id(), balance = handle.balance().await, "shutting down");
    running.shutdown();
    Ok(())
}

async fn run_observer(path: Option<PathBuf>, args: ObserverArgs) -> anyhow::Result<()> {
    let mut config = match path {
        Some(path) => ObserverConfig::from_file(&path)
            .with_context(|| format!("loading observer config from {}", path.display()))?,
        None => ObserverConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(branches) = args.branches {
        config.n_branches = branches;
    }
    if let Some(unit) = args.money_unit {
        config.money_unit = unit;
    }
    if let Some(path) = args.reset_registry {
        FileRegistry::new(&path)
            .and_then(|registry| registry.reset())
            .with_context(|| format!("resetting registry {}", path.display()))?;
    }

    let observer = Observer::new(config);
    let listener = observer.bind().await.context("binding observer")?;
    tokio::select! {
        result = observer.run(listener) => result.context("observer stopped")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("interrupted");
        }
    }
    Ok(())
}
