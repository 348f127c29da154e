//! Raw API payload normalization.
//!
//! The schedules API returns loosely typed JSON: codes in mixed case, numbers
//! sometimes quoted and sometimes not, nested objects that may be `null`. This
//! module parses one raw flight object into typed structs and then into the
//! canonical [`FlightRecord`], rejecting records that lack identity fields.

use chrono::{NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::flight::{codeshare_group_id, minutes_of_day, FlightRecord, OperatingFlight, QueryType, Weekdays};

/// One endpoint (departure or arrival) of a raw API flight.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawEndpoint {
    #[serde(deserialize_with = "lenient_text")]
    iata_code: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    icao_code: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    terminal: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    gate: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    scheduled_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAircraft {
    #[serde(deserialize_with = "lenient_text")]
    model_code: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    model_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAirline {
    #[serde(deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    iata_code: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    icao_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawFlightIdent {
    #[serde(deserialize_with = "lenient_text")]
    number: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    iata_number: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    icao_number: Option<String>,
}

/// A raw flight object as returned by the schedules API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawFlight {
    #[serde(deserialize_with = "lenient_text")]
    weekday: Option<String>,
    departure: Option<RawEndpoint>,
    arrival: Option<RawEndpoint>,
    aircraft: Option<RawAircraft>,
    airline: Option<RawAirline>,
    flight: Option<RawFlightIdent>,
    codeshared: Option<RawCodeshare>,
}

/// The operating carrier of a codeshare, nested under `codeshared`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCodeshare {
    airline: Option<RawAirline>,
    flight: Option<RawFlightIdent>,
}

/// Accept strings, numbers, booleans, or null as optional text.
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Trim and uppercase an optional text field; absent becomes empty.
fn clean(value: Option<&String>) -> String {
    value.map(|s| s.trim().to_uppercase()).unwrap_or_default()
}

/// Normalize a scheduled time to `HH:MM`.
///
/// Accepts `HH:MM`, `HHMM`, `HH:MM:SS` and ISO date-times. Anything else is
/// returned uppercased and unchanged.
fn normalize_time(value: Option<&String>) -> String {
    let raw = clean(value);
    if raw.is_empty() {
        return raw;
    }

    let parsed = ["%H:%M", "%H%M", "%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&raw, fmt).ok())
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
                .map(|dt| dt.time())
        });

    match parsed {
        Some(time) => time.format("%H:%M").to_string(),
        None => {
            debug!("Keeping unparseable scheduled time '{}'", raw);
            raw
        }
    }
}

/// Parse the API weekday (1..=7).
fn parse_weekday(value: Option<&String>) -> Result<u8> {
    let raw = value.map(|s| s.trim()).unwrap_or_default();
    if raw.is_empty() {
        return Err(Error::malformed("missing weekday"));
    }
    raw.parse::<u8>()
        .ok()
        .filter(|day| (1..=7).contains(day))
        .ok_or_else(|| Error::malformed(format!("invalid weekday '{raw}'")))
}

/// Shift an arrival-anchored weekday back one day for overnight flights.
///
/// The arrivals feed reports the weekday on which the flight lands. When the
/// scheduled departure is later in the day than the arrival, the flight left
/// the previous day, so the stored weekday moves back by one (Monday wraps to
/// Sunday).
fn departure_weekday(weekday: u8, query_type: QueryType, dep_time: &str, arr_time: &str) -> u8 {
    if query_type != QueryType::Arrival {
        return weekday;
    }
    match (minutes_of_day(dep_time), minutes_of_day(arr_time)) {
        (Some(dep), Some(arr)) if dep > arr => {
            let corrected = if weekday == 1 { 7 } else { weekday - 1 };
            debug!(
                "Overnight arrival {} -> {}: weekday {} -> {}",
                dep_time, arr_time, weekday, corrected
            );
            corrected
        }
        _ => weekday,
    }
}

/// The operating side of a codeshare; `None` when the object is absent or
/// names no carrier.
fn operating_flight(raw: Option<RawCodeshare>) -> Option<OperatingFlight> {
    let raw = raw?;
    let airline = raw.airline.unwrap_or_default();
    let ident = raw.flight.unwrap_or_default();

    let airline_iata_code = clean(airline.iata_code.as_ref());
    let mut flight_iata_number = clean(ident.iata_number.as_ref());
    if flight_iata_number.is_empty() {
        let number = clean(ident.number.as_ref());
        if !number.is_empty() {
            flight_iata_number = codeshare_group_id(&airline_iata_code, &number);
        }
    }

    if airline_iata_code.is_empty() && flight_iata_number.is_empty() {
        return None;
    }
    Some(OperatingFlight {
        airline_iata_code,
        flight_iata_number,
    })
}

/// Normalize a raw API flight object into a [`FlightRecord`].
///
/// Every textual field is trimmed and uppercased. The record is stamped with
/// the current time for `created_at` and `updated_at`.
///
/// # Errors
///
/// Returns [`Error::MalformedRecord`] if the object is not a JSON object, has
/// neither `flight.iataNumber` nor `flight.number`, has neither a departure
/// nor an arrival IATA code, or carries no valid weekday.
pub fn normalize(raw: &Value, query_type: QueryType, airport_code: &str) -> Result<FlightRecord> {
    if !raw.is_object() {
        return Err(Error::malformed("expected a JSON object"));
    }
    let parsed = RawFlight::deserialize(raw).map_err(|e| Error::malformed(e.to_string()))?;

    let departure = parsed.departure.unwrap_or_default();
    let arrival = parsed.arrival.unwrap_or_default();
    let aircraft = parsed.aircraft.unwrap_or_default();
    let airline = parsed.airline.unwrap_or_default();
    let ident = parsed.flight.unwrap_or_default();
    let codeshare = operating_flight(parsed.codeshared);

    let flight_number = clean(ident.number.as_ref());
    let flight_iata_number = clean(ident.iata_number.as_ref());
    if flight_number.is_empty() && flight_iata_number.is_empty() {
        return Err(Error::malformed("missing flight number"));
    }

    let dep_iata_code = clean(departure.iata_code.as_ref());
    let arr_iata_code = clean(arrival.iata_code.as_ref());
    if dep_iata_code.is_empty() && arr_iata_code.is_empty() {
        return Err(Error::malformed(format!(
            "flight {flight_iata_number}{flight_number} has no departure or arrival IATA code"
        )));
    }

    let dep_scheduled_time = normalize_time(departure.scheduled_time.as_ref());
    let arr_scheduled_time = normalize_time(arrival.scheduled_time.as_ref());

    let weekday = departure_weekday(
        parse_weekday(parsed.weekday.as_ref())?,
        query_type,
        &dep_scheduled_time,
        &arr_scheduled_time,
    );
    let weekdays = Weekdays::from_days([weekday])?;

    let now = Utc::now();
    Ok(FlightRecord {
        id: None,
        weekdays,
        airport_code: airport_code.trim().to_uppercase(),
        query_type,
        dep_iata_code,
        dep_icao_code: clean(departure.icao_code.as_ref()),
        dep_terminal: clean(departure.terminal.as_ref()),
        dep_gate: clean(departure.gate.as_ref()),
        dep_scheduled_time,
        arr_iata_code,
        arr_icao_code: clean(arrival.icao_code.as_ref()),
        arr_terminal: clean(arrival.terminal.as_ref()),
        arr_gate: clean(arrival.gate.as_ref()),
        arr_scheduled_time,
        aircraft_model_code: clean(aircraft.model_code.as_ref()),
        aircraft_model_text: clean(aircraft.model_text.as_ref()),
        airline_name: clean(airline.name.as_ref()),
        airline_iata_code: clean(airline.iata_code.as_ref()),
        airline_icao_code: clean(airline.icao_code.as_ref()),
        flight_number,
        flight_iata_number,
        flight_icao_number: clean(ident.icao_number.as_ref()),
        codeshare,
        raw_data: raw.to_string(),
        created_at: now,
        updated_at: now,
    })
}
