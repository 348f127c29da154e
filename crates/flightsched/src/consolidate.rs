//! Route search and consolidation.
//!
//! The same real-world flight is usually observed twice: once from the
//! departure airport's departures board and once from the arrival airport's
//! arrivals board, each with its own partial weekday set. Searching therefore
//! works on actual routes (`dep_iata_code` → `arr_iata_code`) regardless of
//! query perspective, and rows describing the same logical flight are merged
//! into one [`ConsolidatedFlight`] whose weekdays are the union of all
//! observations.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::flight::{
    format_minutes, minutes_between, LogicalFlightKey, OperatingFlight, QueryType, Weekdays,
};
use crate::storage::{FlightRow, RowFilter, Storage};

/// Literal search criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Departure airport IATA code.
    pub origin: Option<String>,
    /// Arrival airport IATA code.
    pub destination: Option<String>,
    /// Airline IATA code.
    pub airline: Option<String>,
    /// Flight number, with or without the airline prefix.
    pub flight: Option<String>,
    /// Maximum number of consolidated flights returned.
    pub limit: Option<usize>,
}

impl SearchCriteria {
    /// Criteria for one flight, prefixed with `airline` when given.
    #[must_use]
    pub fn for_flight(flight: &str, airline: Option<&str>) -> Self {
        Self {
            airline: airline.map(str::to_string),
            flight: Some(flight.to_string()),
            ..Self::default()
        }
    }

    /// The flight designator to match, uppercased.
    ///
    /// A number without the airline prefix gets it when an airline is given:
    /// `215` with airline `PR` becomes `PR215`.
    #[must_use]
    pub fn flight_designator(&self) -> Option<String> {
        let flight = self.flight.as_deref().map(|f| f.trim().to_uppercase())?;
        if flight.is_empty() {
            return None;
        }
        match self.airline.as_deref().map(|a| a.trim().to_uppercase()) {
            Some(airline) if !airline.is_empty() && !flight.starts_with(&airline) => {
                Some(format!("{airline}{flight}"))
            }
            _ => Some(flight),
        }
    }

    fn to_filter(&self) -> RowFilter {
        RowFilter {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            airline: self.airline.clone(),
            flight: self.flight_designator(),
        }
    }
}

/// One logical flight merged from all rows that observe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedFlight {
    /// Flight designator (IATA number, else bare number).
    pub flight: String,
    /// Airline IATA code.
    pub airline_iata_code: String,
    /// Airline name.
    pub airline_name: String,
    /// Departure airport IATA code.
    pub dep_iata_code: String,
    /// Arrival airport IATA code.
    pub arr_iata_code: String,
    /// Scheduled departure time.
    pub dep_scheduled_time: String,
    /// Scheduled arrival time.
    pub arr_scheduled_time: String,
    /// Departure terminal.
    pub dep_terminal: String,
    /// Arrival terminal.
    pub arr_terminal: String,
    /// Aircraft model code.
    pub aircraft_model_code: String,
    /// Aircraft model description.
    pub aircraft_model_text: String,
    /// Union of the weekdays of every observation.
    pub weekdays: Weekdays,
    /// Number of rows merged.
    pub observations: usize,
    /// Query perspectives that observed this flight.
    pub query_types: BTreeSet<QueryType>,
    /// Operating carrier when this designator is a codeshare.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operated_by: Option<OperatingFlight>,
}

impl ConsolidatedFlight {
    /// `MNL→POM`.
    #[must_use]
    pub fn route(&self) -> String {
        format!("{}→{}", self.dep_iata_code, self.arr_iata_code)
    }

    /// Block time in minutes, wrapping past midnight.
    #[must_use]
    pub fn duration_minutes(&self) -> Option<u32> {
        minutes_between(&self.dep_scheduled_time, &self.arr_scheduled_time)
    }

    /// Block time as `1h15m`, or `N/A` when a time is unreadable.
    #[must_use]
    pub fn duration_display(&self) -> String {
        self.duration_minutes()
            .map_or_else(|| "N/A".to_string(), format_minutes)
    }
}

/// How two flights relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// The routes are exact reverses of each other.
    RoundTrip,
    /// Both flights exist but their routes are not reverses.
    Unrelated,
    /// At least one flight has no data.
    Undetermined,
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RoundTrip => "round trip",
            Self::Unrelated => "unrelated routes",
            Self::Undetermined => "undetermined (insufficient data)",
        })
    }
}

/// One side of a pair analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairSide {
    /// The designator that was searched for.
    pub designator: String,
    /// Raw rows found.
    pub records: usize,
    /// Consolidated flights found, in search order.
    pub flights: Vec<ConsolidatedFlight>,
}

impl PairSide {
    /// The flight the relationship is judged on (earliest departure).
    #[must_use]
    pub fn primary(&self) -> Option<&ConsolidatedFlight> {
        self.flights.first()
    }
}

/// Result of [`analyze_pair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairAnalysis {
    /// The outbound flight.
    pub first: PairSide,
    /// The return flight.
    pub second: PairSide,
    /// How the two relate.
    pub relationship: Relationship,
    /// Minutes from the first flight's arrival to the second's departure,
    /// for round trips.
    pub turnaround_minutes: Option<u32>,
}

/// Aggregate view of one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    /// Departure airport.
    pub origin: String,
    /// Arrival airport.
    pub destination: String,
    /// Raw rows on the route.
    pub records: usize,
    /// Airline codes operating it.
    pub airlines: Vec<String>,
    /// Aircraft descriptions seen.
    pub aircraft_types: Vec<String>,
    /// Rows per query perspective (`unknown` for legacy rows).
    pub sources: BTreeMap<String, usize>,
    /// The consolidated flights.
    pub flights: Vec<ConsolidatedFlight>,
}

/// Aggregate view of one airline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirlineSummary {
    /// Airline code.
    pub airline: String,
    /// Raw rows.
    pub records: usize,
    /// Consolidated flights.
    pub unique_flights: usize,
    /// Distinct origins.
    pub origins: usize,
    /// Distinct destinations.
    pub destinations: usize,
    /// Distinct aircraft descriptions.
    pub aircraft_types: usize,
    /// Distinct routes, sorted.
    pub routes: Vec<String>,
}

/// Sort key putting `PR215` before `PR1000`.
fn designator_order(a: &str, b: &str) -> Ordering {
    fn split(s: &str) -> (&str, Option<u64>, &str) {
        let prefix_len = s.len().min(2);
        let (prefix, rest) = s.split_at(if s.is_char_boundary(prefix_len) { prefix_len } else { 0 });
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let (number, suffix) = rest.split_at(digits);
        (prefix, number.parse().ok(), suffix)
    }
    split(a).cmp(&split(b)).then_with(|| a.cmp(b))
}

fn flight_order(a: &ConsolidatedFlight, b: &ConsolidatedFlight) -> Ordering {
    designator_order(&a.flight, &b.flight)
        .then_with(|| a.dep_scheduled_time.cmp(&b.dep_scheduled_time))
        .then_with(|| a.dep_iata_code.cmp(&b.dep_iata_code))
        .then_with(|| a.arr_iata_code.cmp(&b.arr_iata_code))
        .then_with(|| a.arr_scheduled_time.cmp(&b.arr_scheduled_time))
}

/// Merge rows into logical flights.
///
/// Rows are grouped by [`LogicalFlightKey`]; weekdays are unioned. Other
/// fields come from the most recently created row (ties go to the highest
/// id); disagreements are logged. The result is ordered by flight number,
/// then departure time.
#[must_use]
pub fn consolidate(rows: Vec<FlightRow>) -> Vec<ConsolidatedFlight> {
    let mut groups: BTreeMap<LogicalFlightKey, Vec<FlightRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.logical_key()).or_default().push(row);
    }

    let mut flights: Vec<ConsolidatedFlight> = groups
        .into_iter()
        .filter_map(|(key, group)| merge_group(&key, &group))
        .collect();
    flights.sort_by(flight_order);
    flights
}

fn merge_group(key: &LogicalFlightKey, group: &[FlightRow]) -> Option<ConsolidatedFlight> {
    let latest = group
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))?;

    let weekdays = group
        .iter()
        .fold(Weekdays::empty(), |acc, row| acc.union(row.weekdays));
    let query_types: BTreeSet<QueryType> = group.iter().filter_map(|row| row.query_type).collect();

    let fields: [(&str, fn(&FlightRow) -> String); 4] = [
        ("aircraft", |r| r.aircraft_model_code.clone()),
        ("departure terminal", |r| r.dep_terminal.clone()),
        ("arrival terminal", |r| r.arr_terminal.clone()),
        ("airline", |r| r.airline_iata_code.clone()),
    ];
    for (field, pick) in fields {
        let values: BTreeSet<String> = group
            .iter()
            .map(pick)
            .filter(|v| !v.is_empty())
            .collect();
        if values.len() > 1 {
            warn!(
                "{} {}→{} {}: rows disagree on {} ({}); using row {}",
                key.flight_iata_number,
                key.dep_iata_code,
                key.arr_iata_code,
                key.dep_scheduled_time,
                field,
                values.into_iter().collect::<Vec<_>>().join(" / "),
                latest.id
            );
        }
    }

    Some(ConsolidatedFlight {
        flight: key.flight_iata_number.clone(),
        airline_iata_code: latest.airline_iata_code.clone(),
        airline_name: latest.airline_name.clone(),
        dep_iata_code: key.dep_iata_code.clone(),
        arr_iata_code: key.arr_iata_code.clone(),
        dep_scheduled_time: key.dep_scheduled_time.clone(),
        arr_scheduled_time: key.arr_scheduled_time.clone(),
        dep_terminal: latest.dep_terminal.clone(),
        arr_terminal: latest.arr_terminal.clone(),
        aircraft_model_code: latest.aircraft_model_code.clone(),
        aircraft_model_text: latest.aircraft_model_text.clone(),
        weekdays,
        observations: group.len(),
        query_types,
        operated_by: latest.codeshare.clone(),
    })
}

/// Search and consolidate; `limit` applies to the consolidated flights.
///
/// # Errors
///
/// Returns an error if the storage query fails.
pub fn search(storage: &Storage, criteria: &SearchCriteria) -> Result<Vec<ConsolidatedFlight>> {
    let rows = storage.find_rows(&criteria.to_filter())?;
    let row_count = rows.len();
    let mut flights = consolidate(rows);
    debug!("{} rows consolidated into {} flights", row_count, flights.len());

    if let Some(limit) = criteria.limit {
        flights.truncate(limit);
    }
    Ok(flights)
}

/// Relationship and turnaround of two consolidated flights.
#[must_use]
pub fn relate(first: &ConsolidatedFlight, second: &ConsolidatedFlight) -> (Relationship, Option<u32>) {
    if first.dep_iata_code == second.arr_iata_code && first.arr_iata_code == second.dep_iata_code {
        let turnaround = minutes_between(&first.arr_scheduled_time, &second.dep_scheduled_time);
        (Relationship::RoundTrip, turnaround)
    } else {
        (Relationship::Unrelated, None)
    }
}

/// Analyze a pair of flights, typically an outbound and its return.
///
/// # Errors
///
/// Returns an error if a storage query fails.
pub fn analyze_pair(storage: &Storage, first: &str, second: &str, airline: Option<&str>) -> Result<PairAnalysis> {
    let side = |flight: &str| -> Result<PairSide> {
        let criteria = SearchCriteria::for_flight(flight, airline);
        let rows = storage.find_rows(&criteria.to_filter())?;
        Ok(PairSide {
            designator: criteria.flight_designator().unwrap_or_default(),
            records: rows.len(),
            flights: consolidate(rows),
        })
    };
    let first = side(first)?;
    let second = side(second)?;

    let (relationship, turnaround_minutes) = match (first.primary(), second.primary()) {
        (Some(a), Some(b)) => relate(a, b),
        _ => (Relationship::Undetermined, None),
    };

    Ok(PairAnalysis {
        first,
        second,
        relationship,
        turnaround_minutes,
    })
}

/// Summarize one route.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if either airport is blank, or an error
/// if the storage query fails.
pub fn route_summary(storage: &Storage, origin: &str, destination: &str) -> Result<RouteSummary> {
    let origin = origin.trim().to_uppercase();
    let destination = destination.trim().to_uppercase();
    if origin.is_empty() || destination.is_empty() {
        return Err(Error::invalid_argument(
            "route summary requires both origin and destination",
        ));
    }

    let rows = storage.find_rows(&RowFilter {
        origin: Some(origin.clone()),
        destination: Some(destination.clone()),
        ..RowFilter::default()
    })?;

    let mut sources: BTreeMap<String, usize> = BTreeMap::new();
    for row in &rows {
        let label = row.query_type.map_or("unknown", QueryType::as_str);
        *sources.entry(label.to_string()).or_default() += 1;
    }
    let records = rows.len();
    let flights = consolidate(rows);

    let airlines: BTreeSet<String> = flights
        .iter()
        .map(|f| f.airline_iata_code.clone())
        .filter(|a| !a.is_empty())
        .collect();
    let aircraft_types: BTreeSet<String> = flights
        .iter()
        .map(|f| f.aircraft_model_text.clone())
        .filter(|a| !a.is_empty())
        .collect();

    Ok(RouteSummary {
        origin,
        destination,
        records,
        airlines: airlines.into_iter().collect(),
        aircraft_types: aircraft_types.into_iter().collect(),
        sources,
        flights,
    })
}

/// Summarize one airline.
///
/// # Errors
///
/// Returns an error if the storage query fails.
pub fn airline_summary(storage: &Storage, airline: &str) -> Result<AirlineSummary> {
    let airline = airline.trim().to_uppercase();
    let rows = storage.find_rows(&RowFilter {
        airline: Some(airline.clone()),
        ..RowFilter::default()
    })?;

    let records = rows.len();
    let mut routes = BTreeSet::new();
    let mut origins = BTreeSet::new();
    let mut destinations = BTreeSet::new();
    let mut aircraft = BTreeSet::new();
    for row in &rows {
        routes.insert(format!("{}→{}", row.dep_iata_code, row.arr_iata_code));
        origins.insert(row.dep_iata_code.clone());
        destinations.insert(row.arr_iata_code.clone());
        if !row.aircraft_model_text.is_empty() {
            aircraft.insert(row.aircraft_model_text.clone());
        }
    }
    let unique_flights = consolidate(rows).len();

    Ok(AirlineSummary {
        airline,
        records,
        unique_flights,
        origins: origins.len(),
        destinations: destinations.len(),
        aircraft_types: aircraft.len(),
        routes: routes.into_iter().collect(),
    })
}
