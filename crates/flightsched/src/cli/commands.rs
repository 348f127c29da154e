//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};

use crate::flight::QueryType;

/// Search command arguments.
///
/// Without `--route`, `--pair` or `--summary` this lists consolidated
/// flights matching the filters.
#[derive(Debug, Args)]
pub struct SearchCommand {
    /// Origin airport (IATA code)
    #[arg(short, long, value_name = "CODE")]
    pub origin: Option<String>,

    /// Destination airport (IATA code)
    #[arg(short, long, value_name = "CODE")]
    pub destination: Option<String>,

    /// Airline IATA code
    #[arg(short, long, value_name = "CODE")]
    pub airline: Option<String>,

    /// Flight number, with or without airline prefix
    #[arg(short, long, value_name = "NUMBER")]
    pub flight: Option<String>,

    /// Summarize the route given by --origin and --destination
    #[arg(short, long, requires_all = ["origin", "destination"], conflicts_with_all = ["pair", "summary"])]
    pub route: bool,

    /// Analyze how two flights relate
    #[arg(short, long, num_args = 2, value_names = ["F1", "F2"], conflicts_with = "summary")]
    pub pair: Option<Vec<String>>,

    /// Summarize an airline's operations
    #[arg(short, long, value_name = "AIRLINE")]
    pub summary: Option<String>,

    /// Maximum number of consolidated flights to show
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Collect command arguments.
#[derive(Debug, Args)]
pub struct CollectCommand {
    /// Anchor airport (repeatable)
    #[arg(long = "airport", value_name = "CODE")]
    pub airports: Vec<String>,

    /// Query perspective
    #[arg(short = 't', long = "type", value_enum)]
    pub query_type: Option<QueryTypeArg>,

    /// First date to query (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Number of consecutive dates
    #[arg(long)]
    pub days: Option<u32>,

    /// Presets file with airports and dates
    #[arg(long, value_name = "FILE")]
    pub presets: Option<PathBuf>,
}

/// Import command arguments.
#[derive(Debug, Args)]
pub struct ImportCommand {
    /// Saved JSON response (an array of flight objects)
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Query perspective the response was fetched with
    #[arg(short = 't', long = "type", value_enum)]
    pub query_type: SingleQueryType,

    /// Anchor airport the response was fetched for
    #[arg(long, value_name = "CODE")]
    pub airport: String,
}

/// Stats command arguments.
#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Restrict to one anchor airport
    #[arg(long, value_name = "CODE")]
    pub airport: Option<String>,

    /// Restrict to one query perspective
    #[arg(short = 't', long = "type", value_enum)]
    pub query_type: Option<SingleQueryType>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Migrate command arguments.
#[derive(Debug, Args)]
pub struct MigrateCommand {
    /// Apply the changes instead of reporting them
    #[arg(short, long)]
    pub yes: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Query perspective argument for collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryTypeArg {
    /// Flights leaving the anchor airport
    Departure,
    /// Flights arriving at the anchor airport
    Arrival,
    /// Both perspectives
    Both,
}

impl QueryTypeArg {
    /// The perspectives this argument selects.
    #[must_use]
    pub fn query_types(self) -> Vec<QueryType> {
        match self {
            Self::Departure => vec![QueryType::Departure],
            Self::Arrival => vec![QueryType::Arrival],
            Self::Both => QueryType::ALL.to_vec(),
        }
    }
}

/// A single query perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SingleQueryType {
    /// Flights leaving the anchor airport
    Departure,
    /// Flights arriving at the anchor airport
    Arrival,
}

impl From<SingleQueryType> for QueryType {
    fn from(arg: SingleQueryType) -> Self {
        match arg {
            SingleQueryType::Departure => Self::Departure,
            SingleQueryType::Arrival => Self::Arrival,
        }
    }
}
