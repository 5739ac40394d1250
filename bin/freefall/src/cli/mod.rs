use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod bodies;
pub use self::bodies::handle_bodies_command;
use self::bodies::BodiesCommand;

mod count;
pub use self::count::handle_count_command;
use self::count::CountCommand;

mod drop;
pub use self::drop::handle_drop_command;
use self::drop::DropCommand;

mod run;
pub use self::run::handle_run_command;
use self::run::RunCommand;

/// Computes the velocity of falling objects with a supervised, self-healing worker.
#[derive(Debug, Parser)]
#[command(name = "freefall", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Action,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Action {
    /// Reads `<body> <distance>` requests from standard input and prints a report for each one.
    Run(RunCommand),

    /// Computes a single fall and prints its report.
    Drop(DropCommand),

    /// Prints the gravity table.
    Bodies(BodiesCommand),

    /// Sends messages to a registered counter and prints how many it received.
    Count(CountCommand),
}
