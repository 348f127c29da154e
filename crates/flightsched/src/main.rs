//! `fsched` - CLI for flightsched
//!
//! This binary collects flight schedules into the local database and
//! searches what has been collected.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;

use flightsched::cli::{
    Cli, CollectCommand, Command, ConfigCommand, ImportCommand, SearchCommand, StatsCommand,
};
use flightsched::client::{parse_body, AviationEdgeClient, Pacer, RetryPolicy};
use flightsched::collect::{collect, CollectionPlan, PlanOverrides};
use flightsched::config::is_airport_code;
use flightsched::consolidate::{self, SearchCriteria};
use flightsched::flight::QueryType;
use flightsched::presets::Presets;
use flightsched::storage::{self, schema, Storage};
use flightsched::{init_logging, report, Config, Error};

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        config: config_path,
        db,
        command,
        ..
    } = cli;

    // config subcommands load configuration themselves
    let load = || -> Result<(Config, PathBuf)> {
        let config = Config::load_from(config_path.clone()).context("failed to load configuration")?;
        let db_path = db.clone().unwrap_or_else(|| config.database_path());
        Ok((config, db_path))
    };

    match command {
        Command::Search(cmd) => handle_search(&load()?.1, &cmd),
        Command::Collect(cmd) => {
            let (config, db_path) = load()?;
            handle_collect(&config, &db_path, cmd)
        }
        Command::Import(cmd) => handle_import(&load()?.1, &cmd),
        Command::Stats(cmd) => handle_stats(&load()?.1, &cmd),
        Command::Schema => handle_schema(&load()?.1),
        Command::Migrate(cmd) => handle_migrate(&load()?.1, cmd.yes),
        Command::Config(cmd) => handle_config(config_path.clone(), cmd),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn search_title(cmd: &SearchCommand) -> String {
    let mut parts = Vec::new();
    match (&cmd.origin, &cmd.destination) {
        (Some(o), Some(d)) => parts.push(format!("{}→{}", o.to_uppercase(), d.to_uppercase())),
        (Some(o), None) => parts.push(format!("from {}", o.to_uppercase())),
        (None, Some(d)) => parts.push(format!("to {}", d.to_uppercase())),
        (None, None) => {}
    }
    if let Some(airline) = &cmd.airline {
        parts.push(format!("airline {}", airline.to_uppercase()));
    }
    if let Some(flight) = &cmd.flight {
        parts.push(format!("flight {}", flight.to_uppercase()));
    }
    if parts.is_empty() {
        "Flights".to_string()
    } else {
        format!("Flights {}", parts.join(", "))
    }
}

fn handle_search(db_path: &Path, cmd: &SearchCommand) -> Result<()> {
    let storage = Storage::open_existing(db_path)?;

    if let Some(pair) = &cmd.pair {
        let [first, second] = pair.as_slice() else {
            bail!("--pair takes exactly two flight numbers");
        };
        let analysis = consolidate::analyze_pair(&storage, first, second, cmd.airline.as_deref())?;
        if cmd.json {
            return print_json(&analysis);
        }
        print!("{}", report::format_pair(&analysis));
        return Ok(());
    }

    if let Some(airline) = &cmd.summary {
        let summary = consolidate::airline_summary(&storage, airline)?;
        if cmd.json {
            return print_json(&summary);
        }
        print!("{}", report::format_airline_summary(&summary));
        return Ok(());
    }

    if cmd.route {
        let (Some(origin), Some(destination)) = (&cmd.origin, &cmd.destination) else {
            bail!("--route requires --origin and --destination");
        };
        let summary = consolidate::route_summary(&storage, origin, destination)?;
        if cmd.json {
            return print_json(&summary);
        }
        print!("{}", report::format_route_summary(&summary));
        return Ok(());
    }

    let criteria = SearchCriteria {
        origin: cmd.origin.clone(),
        destination: cmd.destination.clone(),
        airline: cmd.airline.clone(),
        flight: cmd.flight.clone(),
        limit: cmd.limit,
    };
    let flights = consolidate::search(&storage, &criteria)?;
    if cmd.json {
        return print_json(&flights);
    }
    print!("{}", report::format_table(&flights, &search_title(cmd)));
    Ok(())
}

fn handle_collect(config: &Config, db_path: &Path, cmd: CollectCommand) -> Result<()> {
    let presets = cmd
        .presets
        .as_ref()
        .map(Presets::load)
        .transpose()
        .context("failed to read presets")?;

    let overrides = PlanOverrides {
        airports: cmd.airports,
        query_types: cmd.query_type.map(|t| t.query_types()),
        date: cmd.date,
        days: cmd.days,
    };
    let today = Utc::now().date_naive();
    let plan = CollectionPlan::resolve(&config.collect, presets.as_ref(), &overrides, today)?;

    let client = AviationEdgeClient::new(&config.api)?;
    let storage = Storage::open(db_path)?;
    let mut pacer = Pacer::for_run(&config.api, plan.calls());
    let retry = RetryPolicy::from_config(&config.api);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let collected = runtime.block_on(collect(&client, &storage, &plan, &mut pacer, &retry, today))?;

    print!("{}", report::format_collection_report(&collected));
    if collected.calls_attempted > 0 && collected.calls_failed == collected.calls_attempted {
        bail!("all {} API calls failed", collected.calls_attempted);
    }
    Ok(())
}

fn handle_import(db_path: &Path, cmd: &ImportCommand) -> Result<()> {
    if !is_airport_code(&cmd.airport) {
        return Err(Error::invalid_argument(format!("invalid airport code: {:?}", cmd.airport)).into());
    }

    let body = std::fs::read_to_string(&cmd.file)
        .with_context(|| format!("failed to read {}", cmd.file.display()))?;
    let raws = parse_body(&body)?;

    let storage = Storage::open(db_path)?;
    let ingested = storage.ingest(&raws, QueryType::from(cmd.query_type), &cmd.airport.to_uppercase())?;
    print!("{}", report::format_ingest_report(&ingested, &cmd.file.display().to_string()));
    Ok(())
}

fn handle_stats(db_path: &Path, cmd: &StatsCommand) -> Result<()> {
    let storage = Storage::open_existing(db_path)?;
    let query_type = cmd.query_type.map(QueryType::from);
    let summary = storage.summary(cmd.airport.as_deref(), query_type)?;
    if cmd.json {
        return print_json(&summary);
    }

    let mut scope = match &cmd.airport {
        Some(airport) => airport.to_uppercase(),
        None => "all airports".to_string(),
    };
    if let Some(query_type) = query_type {
        scope = format!("{scope}, {query_type}");
    }
    print!("{}", report::format_collection_summary(&summary, &scope));
    Ok(())
}

fn existing_db(db_path: &Path) -> Result<PathBuf> {
    if !db_path.exists() {
        return Err(Error::DatabaseMissing {
            path: db_path.to_path_buf(),
        }
        .into());
    }
    Ok(db_path.to_path_buf())
}

fn handle_schema(db_path: &Path) -> Result<()> {
    let conn = storage::connect(&existing_db(db_path)?)?;
    let table = storage::probe(&conn)?;
    let distribution = schema::query_type_distribution(&conn)?;
    print!("{}", report::format_schema_report(&table, &distribution));
    Ok(())
}

fn handle_migrate(db_path: &Path, confirmed: bool) -> Result<()> {
    let mut conn = storage::connect(&existing_db(db_path)?)?;
    let backfill = storage::backfill_query_type(&mut conn, confirmed)?;
    print!("{}", report::format_backfill_report(&backfill));
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let mut shown = Config::load_from(config_path).context("failed to load configuration")?;
            if shown.api.api_key.is_some() {
                shown.api.api_key = Some("<redacted>".to_string());
            }
            if json {
                return print_json(&shown);
            }
            let airports = if shown.collect.airports.is_empty() {
                "(none)".to_string()
            } else {
                shown.collect.airports.join(", ")
            };
            let query_types: Vec<&str> = shown.collect.query_types.iter().map(|t| t.as_str()).collect();

            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Storage]");
            println!("  Database path:      {}", shown.database_path().display());
            println!();
            println!("[API]");
            println!("  Base URL:           {}", shown.api.base_url);
            println!(
                "  API key:            {}",
                shown.api.api_key.as_deref().unwrap_or("(not set)")
            );
            println!("  Timeout (secs):     {}", shown.api.timeout_secs);
            println!("  Max retries:        {}", shown.api.max_retries);
            println!("  Backoff base (ms):  {}", shown.api.backoff_base_ms);
            println!("  Min spacing (ms):   {}", shown.api.min_spacing_ms);
            println!(
                "  Batch spacing (ms): {} (above {} calls)",
                shown.api.batch_spacing_ms, shown.api.batch_threshold
            );
            println!();
            println!("[Collect]");
            println!("  Airports:           {airports}");
            println!("  Query types:        {}", query_types.join(", "));
            println!("  Date offset (days): {}", shown.collect.date_offset_days);
            println!("  Days:               {}", shown.collect.days);
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(config_path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            Config::load_from(Some(path.clone()))
                .with_context(|| format!("configuration {} is invalid", path.display()))?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}
