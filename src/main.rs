use clap::{Parser, Subcommand};
use rl_orchestra::{LaunchArgs, NodeArgs, launch, logging, node};

/// Distributed reinforcement learning runs: parameter servers, workers and the
/// orchestrator starting them.
#[derive(Debug, Parser)]
#[command(name = "rl-orchestra", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Starts every process of a run and waits for it to finish.
    Launch(LaunchArgs),
    /// Runs a single process of a run, started by `launch`.
    Node(NodeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Launch(args) => {
            logging::init_stderr();

            let report = launch::launch(args).await?;
            print!("{report}");

            if !report.succeeded() {
                std::process::exit(1);
            }
        }
        Command::Node(args) => node::run(args).await?,
    }

    Ok(())
}
