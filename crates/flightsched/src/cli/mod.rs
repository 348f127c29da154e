//! Command-line interface for flightsched.
//!
//! This module provides the CLI structure for the `fsched` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CollectCommand, ConfigCommand, ImportCommand, MigrateCommand, QueryTypeArg, SearchCommand,
    SingleQueryType, StatsCommand,
};

/// fsched - Collect and search airline flight schedules
///
/// Pulls future schedules from the flight data API into a local SQLite
/// database and merges the observations into one entry per flight.
#[derive(Debug, Parser)]
#[command(name = "fsched")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the schedule database (overrides configuration)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search stored schedules
    Search(SearchCommand),

    /// Fetch schedules from the API and store them
    Collect(CollectCommand),

    /// Store a saved API response
    Import(ImportCommand),

    /// Show collection statistics
    Stats(StatsCommand),

    /// Show the database table layout
    Schema,

    /// Back-fill the query_type column of older databases
    Migrate(MigrateCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
