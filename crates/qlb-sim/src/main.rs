use std::error::Error;

use clap::{Parser, Subcommand};
use qlb_sim::commands::clear_panics::{self, ClearPanicsArgs};
use qlb_sim::commands::run::{self, RunArgs};
use qlb_sim::commands::status::{self, StatusArgs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "qlb-sim", version, about = "QEC Monte Carlo benchmark runner")]
struct Cli {
    /// Log filter used when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample the plan's jobs until its submitter is satisfied.
    Run(RunArgs),
    /// Print persisted progress without sampling.
    Status(StatusArgs),
    /// Re-enable jobs that were excluded after a failed dispatch.
    ClearPanics(ClearPanicsArgs),
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Command::Run(args) => {
            let outcome = run::run(&args)?;
            println!("{}", outcome.report);
            println!(
                "exit: {:?}, iterations: {}, dispatched: {}, failed: {}",
                outcome.summary.exit,
                outcome.summary.iterations,
                outcome.summary.dispatched,
                outcome.summary.failed
            );
        }
        Command::Status(args) => println!("{}", status::run(&args)?),
        Command::ClearPanics(args) => {
            let cleared = clear_panics::run(&args)?;
            println!("cleared {cleared} panic entries");
        }
    }
    Ok(())
}
