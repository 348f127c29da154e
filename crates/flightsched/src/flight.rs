//! Core flight schedule types for flightsched.
//!
//! This module defines the canonical record shape persisted in the `flights`
//! table, the weekday set observed by a query, and the keys used for
//! deduplication and consolidation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minutes in a day, used for time-of-day arithmetic.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Abbreviated ISO weekday names, index 0 = Monday.
const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Which query perspective produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// The anchor airport was queried for departures.
    Departure,
    /// The anchor airport was queried for arrivals.
    Arrival,
}

impl QueryType {
    /// Both query types, departure first.
    pub const ALL: [QueryType; 2] = [QueryType::Departure, QueryType::Arrival];

    /// The lowercase value stored in the database and sent to the API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Departure => "departure",
            Self::Arrival => "arrival",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "departure" => Ok(Self::Departure),
            "arrival" => Ok(Self::Arrival),
            other => Err(Error::invalid_argument(format!(
                "unknown query type '{other}' (expected departure or arrival)"
            ))),
        }
    }
}

/// A set of ISO weekdays (1 = Monday .. 7 = Sunday).
///
/// Stored in the database as comma-separated ascending numbers, e.g. `"2,5,7"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u8>", try_from = "Vec<u8>")]
pub struct Weekdays(u8);

impl Weekdays {
    /// An empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    /// Build a set from day numbers.
    ///
    /// # Errors
    ///
    /// Returns an error if any day is outside 1..=7.
    pub fn from_days(days: impl IntoIterator<Item = u8>) -> Result<Self> {
        let mut set = Self::empty();
        for day in days {
            set.insert(day)?;
        }
        Ok(set)
    }

    /// Add a day to the set.
    ///
    /// # Errors
    ///
    /// Returns an error if `day` is outside 1..=7.
    pub fn insert(&mut self, day: u8) -> Result<()> {
        if !(1..=7).contains(&day) {
            return Err(Error::malformed(format!("weekday {day} outside 1..=7")));
        }
        self.0 |= 1 << (day - 1);
        Ok(())
    }

    /// Check whether a day is in the set.
    #[must_use]
    pub fn contains(self, day: u8) -> bool {
        (1..=7).contains(&day) && self.0 & (1 << (day - 1)) != 0
    }

    /// The union of two sets.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of days in the set.
    #[must_use]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the days in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (1..=7).filter(move |day| self.contains(*day))
    }

    /// Render as abbreviated day names, e.g. `Tue,Fri,Sun`.
    #[must_use]
    pub fn names(self) -> String {
        self.iter()
            .map(weekday_name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the stored form (`"2,5,7"`). Blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is not a number in 1..=7.
    pub fn parse(s: &str) -> Result<Self> {
        let mut set = Self::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let day: u8 = part
                .parse()
                .map_err(|_| Error::malformed(format!("invalid weekday '{part}'")))?;
            set.insert(day)?;
        }
        Ok(set)
    }
}

impl fmt::Display for Weekdays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        f.write_str(&days.join(","))
    }
}

impl From<Weekdays> for Vec<u8> {
    fn from(days: Weekdays) -> Self {
        days.iter().collect()
    }
}

impl TryFrom<Vec<u8>> for Weekdays {
    type Error = Error;

    fn try_from(days: Vec<u8>) -> Result<Self> {
        Self::from_days(days)
    }
}

/// Abbreviated name for an ISO weekday number; `"?"` when out of range.
#[must_use]
pub fn weekday_name(day: u8) -> &'static str {
    match day {
        1..=7 => DAY_NAMES[usize::from(day - 1)],
        _ => "?",
    }
}

/// One observed schedule entry as persisted in the `flights` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Row identifier (assigned by the storage layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Days of operation as seen by this single query.
    pub weekdays: Weekdays,
    /// The airport used as the query anchor.
    pub airport_code: String,
    /// Which query perspective produced this row.
    pub query_type: QueryType,

    /// Departure airport IATA code.
    pub dep_iata_code: String,
    /// Departure airport ICAO code.
    pub dep_icao_code: String,
    /// Departure terminal.
    pub dep_terminal: String,
    /// Departure gate.
    pub dep_gate: String,
    /// Scheduled local departure time, `HH:MM`.
    pub dep_scheduled_time: String,

    /// Arrival airport IATA code.
    pub arr_iata_code: String,
    /// Arrival airport ICAO code.
    pub arr_icao_code: String,
    /// Arrival terminal.
    pub arr_terminal: String,
    /// Arrival gate.
    pub arr_gate: String,
    /// Scheduled local arrival time, `HH:MM`.
    pub arr_scheduled_time: String,

    /// Aircraft model code (e.g. `A321`).
    pub aircraft_model_code: String,
    /// Aircraft model description.
    pub aircraft_model_text: String,

    /// Airline name.
    pub airline_name: String,
    /// Airline IATA code.
    pub airline_iata_code: String,
    /// Airline ICAO code.
    pub airline_icao_code: String,

    /// Bare flight number (e.g. `215`).
    pub flight_number: String,
    /// IATA flight designator (e.g. `PR215`).
    pub flight_iata_number: String,
    /// ICAO flight designator (e.g. `PAL215`).
    pub flight_icao_number: String,

    /// The carrier actually flying this service, when this is a codeshare.
    #[serde(default)]
    pub codeshare: Option<OperatingFlight>,

    /// The original API object, kept for auditing.
    pub raw_data: String,

    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last touched.
    pub updated_at: DateTime<Utc>,
}

impl FlightRecord {
    /// The flight designator used for identity: IATA number, else bare number.
    #[must_use]
    pub fn designator(&self) -> &str {
        if self.flight_iata_number.is_empty() {
            &self.flight_number
        } else {
            &self.flight_iata_number
        }
    }

    /// The deduplication signature of this record.
    #[must_use]
    pub fn signature(&self) -> Signature {
        Signature {
            flight: self.designator().to_string(),
            dep_iata_code: self.dep_iata_code.clone(),
            arr_iata_code: self.arr_iata_code.clone(),
            dep_scheduled_time: self.dep_scheduled_time.clone(),
            query_type: self.query_type,
        }
    }

    /// The key identifying the real-world flight regardless of query angle.
    #[must_use]
    pub fn logical_key(&self) -> LogicalFlightKey {
        LogicalFlightKey {
            flight_iata_number: self.designator().to_string(),
            dep_iata_code: self.dep_iata_code.clone(),
            arr_iata_code: self.arr_iata_code.clone(),
            dep_scheduled_time: self.dep_scheduled_time.clone(),
            arr_scheduled_time: self.arr_scheduled_time.clone(),
        }
    }

    /// Whether this record is a marketing flight operated by another carrier.
    #[must_use]
    pub fn is_codeshare(&self) -> bool {
        self.codeshare.is_some()
    }

    /// Airline IATA code of the operating carrier.
    #[must_use]
    pub fn operating_airline_iata(&self) -> &str {
        self.codeshare
            .as_ref()
            .map_or(self.airline_iata_code.as_str(), |op| op.airline_iata_code.as_str())
    }

    /// IATA designator of the operating flight.
    #[must_use]
    pub fn operating_flight_number(&self) -> &str {
        self.codeshare
            .as_ref()
            .map_or(self.designator(), |op| op.flight_iata_number.as_str())
    }

    /// Identifier shared by an operating flight and all its codeshares.
    #[must_use]
    pub fn codeshare_group_id(&self) -> String {
        codeshare_group_id(self.operating_airline_iata(), self.operating_flight_number())
    }
}

/// The operating side of a codeshare.
///
/// The record's own airline and flight number are the marketing side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatingFlight {
    /// Operating airline IATA code (e.g. `CX`).
    pub airline_iata_code: String,
    /// Operating flight IATA designator (e.g. `CX907`).
    pub flight_iata_number: String,
}

impl fmt::Display for OperatingFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flight_iata_number.is_empty() {
            f.write_str(&self.airline_iata_code)
        } else {
            f.write_str(&self.flight_iata_number)
        }
    }
}

/// Group identifier for an operating flight: its designator, prefixed with
/// the airline code when the designator does not already carry it.
#[must_use]
pub fn codeshare_group_id(airline_iata: &str, flight_number: &str) -> String {
    if flight_number.starts_with(airline_iata) {
        flight_number.to_string()
    } else {
        format!("{airline_iata}{flight_number}")
    }
}

/// Fields deciding whether an incoming record already exists in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Flight designator (IATA number or bare number).
    pub flight: String,
    /// Departure airport IATA code.
    pub dep_iata_code: String,
    /// Arrival airport IATA code.
    pub arr_iata_code: String,
    /// Scheduled departure time.
    pub dep_scheduled_time: String,
    /// Query perspective.
    pub query_type: QueryType,
}

impl Signature {
    /// BLAKE3 digest of the signature fields.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            self.flight.as_str(),
            self.dep_iata_code.as_str(),
            self.arr_iata_code.as_str(),
            self.dep_scheduled_time.as_str(),
            self.query_type.as_str(),
        ] {
            hasher.update(part.as_bytes());
            // unit separator keeps ("AB","C") distinct from ("A","BC")
            hasher.update(&[0x1f]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}→{} {} ({})",
            self.flight, self.dep_iata_code, self.arr_iata_code, self.dep_scheduled_time, self.query_type
        )
    }
}

/// Identity of a logical flight: designator, route and scheduled times.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalFlightKey {
    /// Flight designator.
    pub flight_iata_number: String,
    /// Departure airport IATA code.
    pub dep_iata_code: String,
    /// Arrival airport IATA code.
    pub arr_iata_code: String,
    /// Scheduled departure time.
    pub dep_scheduled_time: String,
    /// Scheduled arrival time.
    pub arr_scheduled_time: String,
}

/// Parse an `HH:MM` time of day into minutes after midnight.
#[must_use]
pub fn minutes_of_day(time: &str) -> Option<u32> {
    let (hours, minutes) = time.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.get(..2).unwrap_or(minutes).parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

/// Minutes from `from` to `to`, wrapping past midnight (result in 0..1440).
#[must_use]
pub fn minutes_between(from: &str, to: &str) -> Option<u32> {
    let from = minutes_of_day(from)?;
    let to = minutes_of_day(to)?;
    Some((to + MINUTES_PER_DAY - from) % MINUTES_PER_DAY)
}

/// Render a minute count as `1h15m`.
#[must_use]
pub fn format_minutes(minutes: u32) -> String {
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}


#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn test_query_type_display() {
        assert_eq!(QueryType::Departure.to_string(), "departure");
        assert_eq!(QueryType::Arrival.to_string(), "arrival");
    }

    #[test]
    fn test_query_type_from_str() {
        assert_eq!("DEPARTURE".parse::<QueryType>().unwrap(), QueryType::Departure);
        assert_eq!(" arrival ".parse::<QueryType>().unwrap(), QueryType::Arrival);
        assert!("both".parse::<QueryType>().is_err());
    }

    #[test]
    fn test_weekdays_parse_and_display() {
        let days = Weekdays::parse("7, 2,5").unwrap();
        assert_eq!(days.to_string(), "2,5,7");
        assert_eq!(days.len(), 3);
        assert!(days.contains(5));
        assert!(!days.contains(1));
    }

    #[test]
    fn test_weekdays_parse_ignores_blanks() {
        assert!(Weekdays::parse("").unwrap().is_empty());
        assert_eq!(Weekdays::parse("3,,").unwrap().to_string(), "3");
    }

    #[test]
    fn test_weekdays_rejects_out_of_range() {
        assert!(Weekdays::parse("0").is_err());
        assert!(Weekdays::parse("8").is_err());
        assert!(Weekdays::parse("mon").is_err());
        assert!(Weekdays::from_days([1, 9]).is_err());
    }

    #[test]
    fn test_weekdays_union() {
        let departures = Weekdays::from_days([2, 7]).unwrap();
        let arrivals = Weekdays::from_days([2, 5, 7]).unwrap();
        assert_eq!(departures.union(arrivals).to_string(), "2,5,7");
    }

    #[test]
    fn test_weekdays_names() {
        let days = Weekdays::from_days([2, 5, 7]).unwrap();
        assert_eq!(days.names(), "Tue,Fri,Sun");
        assert_eq!(weekday_name(1), "Mon");
        assert_eq!(weekday_name(0), "?");
    }

    #[test]
    fn test_weekdays_serde() {
        let days = Weekdays::from_days([1, 3]).unwrap();
        let json = serde_json::to_string(&days).unwrap();
        assert_eq!(json, "[1,3]");
        let back: Weekdays = serde_json::from_str(&json).unwrap();
        assert_eq!(back, days);
        assert!(serde_json::from_str::<Weekdays>("[8]").is_err());
    }

    #[test]
    fn test_signature_uses_iata_number() {
        let rec = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[2]);
        let sig = rec.signature();
        assert_eq!(sig.flight, "PR215");
        assert_eq!(sig.query_type, QueryType::Departure);
    }

    #[test]
    fn test_signature_falls_back_to_number() {
        let mut rec = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[2]);
        rec.flight_iata_number.clear();
        assert_eq!(rec.signature().flight, "215");
    }

    #[test]
    fn test_signature_digest_distinguishes_query_type() {
        let dep = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[2]);
        let arr = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Arrival, &[2]);
        assert_ne!(dep.signature().digest(), arr.signature().digest());
        assert_eq!(dep.signature().digest(), dep.signature().digest());
        assert_eq!(dep.logical_key(), arr.logical_key());
    }

    #[test]
    fn test_signature_ignores_weekdays() {
        let a = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[2]);
        let b = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[7]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_minutes_of_day() {
        assert_eq!(minutes_of_day("00:10"), Some(10));
        assert_eq!(minutes_of_day("13:00"), Some(780));
        assert_eq!(minutes_of_day("24:00"), None);
        assert_eq!(minutes_of_day(""), None);
        assert_eq!(minutes_of_day("noon"), None);
    }

    #[test]
    fn test_minutes_between_wraps_midnight() {
        assert_eq!(minutes_between("08:05", "09:20"), Some(75));
        assert_eq!(minutes_between("21:25", "05:10"), Some(465));
        assert_eq!(minutes_between("10:00", "10:00"), Some(0));
        assert_eq!(minutes_between("x", "10:00"), None);
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(75), "1h15m");
        assert_eq!(format_minutes(475), "7h55m");
    }

    #[test]
    fn test_record_serialization() {
        let rec = record("PR216", ("POM", "MNL"), ("09:20", "13:00"), QueryType::Arrival, &[3]);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"query_type\":\"arrival\""));
        assert!(!json.contains("\"id\""));
        let back: FlightRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_operating_side_defaults_to_own_flight() {
        let rec = record("PR215", ("MNL", "POM"), ("08:05", "13:50"), QueryType::Departure, &[1]);
        assert!(!rec.is_codeshare());
        assert_eq!(rec.operating_airline_iata(), "PR");
        assert_eq!(rec.operating_flight_number(), "PR215");
        assert_eq!(rec.codeshare_group_id(), "PR215");
    }

    #[test]
    fn test_codeshare_groups_by_operating_flight() {
        let mut rec = record("PX5215", ("MNL", "POM"), ("08:05", "13:50"), QueryType::Departure, &[1]);
        rec.codeshare = Some(OperatingFlight {
            airline_iata_code: "PR".to_string(),
            flight_iata_number: "PR215".to_string(),
        });
        assert!(rec.is_codeshare());
        assert_eq!(rec.operating_flight_number(), "PR215");
        assert_eq!(rec.codeshare_group_id(), "PR215");
        assert_eq!(rec.signature().flight, "PX5215");
        assert_eq!(codeshare_group_id("PR", "215"), "PR215");
    }
}
