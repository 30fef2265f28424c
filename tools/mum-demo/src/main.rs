///
/// mum-demo - Demo programs for the mum library
///
/// The library shipped three standalone demo programs. Each subcommand stands
/// in for one of them and prints the same lines:
///
/// - mum-demo threads: the threads demo; start two threads and wait for them
/// - mum-demo mutex: the mutex demo; same, with a mutex around each thread's work
/// - mum-demo locking: the locking demo; same, with the generic lock alias
///

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::Level;

use mum_demo::{Scenario, Stdout, run};

#[derive(Parser)]
#[command(name = "mum-demo")]
#[command(author, version, about = "Demo programs for the mum threading library", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log library events to stderr
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start two threads and wait for both
    Threads,

    /// Serialize two threads with a mutex
    Mutex,

    /// Serialize two threads with the generic lock
    Locking,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let scenario = match cli.command {
        Commands::Threads => Scenario::Threads,
        Commands::Mutex => Scenario::Mutex,
        Commands::Locking => Scenario::Locking,
    };
    run(scenario, Arc::new(Stdout));
}
