use crate::demo::{run_demo, DemoArgs};
use crate::jobs::{run_backfill, run_compute, run_daily, BackfillArgs, ComputeArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use momentum::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Momentum Score Pipeline",
    about = "Compute, backfill, and serve daily momentum scores",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and the daily scheduler (default command)
    Serve(ServeArgs),
    /// Score one user, or every active user, for a single day
    Compute(ComputeArgs),
    /// Recompute a historical date range
    Backfill(BackfillArgs),
    /// Run the scheduled job once for the previous UTC day
    Daily,
    /// Score the documented example scenarios against an in-memory store
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Serve HTTP triggers only; do not start the daily scheduler
    #[arg(long)]
    pub(crate) no_schedule: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Compute(args) => run_compute(args).await,
        Command::Backfill(args) => run_backfill(args).await,
        Command::Daily => run_daily().await,
        Command::Demo(args) => run_demo(args).await,
    }
}
