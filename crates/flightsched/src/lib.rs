//! `flightsched` - Airline flight schedule collector with route consolidation
//!
//! This library fetches future flight schedules from a schedules API, stores
//! the observations in SQLite without duplicates, and merges them into one
//! entry per logical flight for searching and route analysis.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod client;
pub mod collect;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod flight;
pub mod logging;
pub mod normalize;
pub mod presets;
pub mod report;
pub mod storage;

pub use client::{AviationEdgeClient, ScheduleSource};
pub use config::Config;
pub use consolidate::{ConsolidatedFlight, Relationship, SearchCriteria};
pub use error::{Error, Result};
pub use flight::{FlightRecord, OperatingFlight, QueryType, Weekdays};
pub use logging::init_logging;
pub use storage::Storage;
