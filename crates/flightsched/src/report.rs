//! Plain-text rendering of search results and reports.
//!
//! Everything here is pure: functions take data and return the text the CLI
//! prints to stdout.

use crate::collect::CollectionReport;
use crate::consolidate::{AirlineSummary, ConsolidatedFlight, PairAnalysis, PairSide, RouteSummary};
use crate::flight::format_minutes;
use crate::storage::{BackfillReport, CollectionSummary, IngestReport, SchemaReport};

/// Message shown when a search matches nothing.
pub const NO_RESULTS: &str = "No flights found matching criteria";

/// Routes listed in an airline summary before truncating.
const MAX_ROUTES_LISTED: usize = 20;

const HEADERS: [&str; 7] = [
    "Flight",
    "Route",
    "Depart",
    "Arrive",
    "Duration",
    "Operating Days",
    "Aircraft",
];

fn title_block(title: &str) -> Vec<String> {
    vec![title.to_string(), "=".repeat(title.chars().count())]
}

fn border(widths: &[usize], left: &str, mid: &str, right: &str) -> String {
    let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
    format!("{left}{}{right}", segments.join(mid))
}

fn table_row(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!(" {cell:<width$} "))
        .collect();
    format!("│{}│", padded.join("│"))
}

fn aircraft_label(flight: &ConsolidatedFlight) -> String {
    if !flight.aircraft_model_code.is_empty() {
        flight.aircraft_model_code.clone()
    } else if !flight.aircraft_model_text.is_empty() {
        flight.aircraft_model_text.clone()
    } else {
        "N/A".to_string()
    }
}

fn weekday_label(flight: &ConsolidatedFlight) -> String {
    if flight.weekdays.is_empty() {
        "-".to_string()
    } else {
        flight.weekdays.names()
    }
}

fn or_placeholder(value: &str) -> &str {
    if value.is_empty() {
        "?"
    } else {
        value
    }
}

/// Render consolidated flights as a boxed table under `title`.
///
/// Column widths follow the widest cell; nothing is wrapped or truncated.
#[must_use]
pub fn format_table(flights: &[ConsolidatedFlight], title: &str) -> String {
    let mut lines = title_block(title);
    if flights.is_empty() {
        lines.push(NO_RESULTS.to_string());
        return lines.join("\n") + "\n";
    }

    let rows: Vec<Vec<String>> = flights
        .iter()
        .map(|f| {
            vec![
                flight_label(f),
                f.route(),
                or_placeholder(&f.dep_scheduled_time).to_string(),
                or_placeholder(&f.arr_scheduled_time).to_string(),
                f.duration_display(),
                weekday_label(f),
                aircraft_label(f),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let headers: Vec<String> = HEADERS.iter().map(ToString::to_string).collect();
    lines.push(border(&widths, "┌", "┬", "┐"));
    lines.push(table_row(&headers, &widths));
    lines.push(border(&widths, "├", "┼", "┤"));
    lines.extend(rows.iter().map(|row| table_row(row, &widths)));
    lines.push(border(&widths, "└", "┴", "┘"));

    let codeshares: Vec<String> = flights
        .iter()
        .filter_map(|f| {
            f.operated_by
                .as_ref()
                .map(|op| format!("* {} operated by {}", f.flight, op))
        })
        .collect();
    if !codeshares.is_empty() {
        lines.push(String::new());
        lines.extend(codeshares);
    }

    let records: usize = flights.iter().map(|f| f.observations).sum();
    lines.push(String::new());
    lines.push(format!(
        "Total: {} unique flights ({} database records)",
        flights.len(),
        records
    ));
    lines.join("\n") + "\n"
}

/// Flight designator, starred when another carrier operates it.
fn flight_label(flight: &ConsolidatedFlight) -> String {
    if flight.operated_by.is_some() {
        format!("{}*", flight.flight)
    } else {
        flight.flight.clone()
    }
}

fn pair_side_lines(side: &PairSide) -> Vec<String> {
    if side.flights.is_empty() {
        return vec![format!("{}: no data", side.designator)];
    }
    side.flights
        .iter()
        .map(|f| {
            let operated = f
                .operated_by
                .as_ref()
                .map(|op| format!(" operated by {op}"))
                .unwrap_or_default();
            format!(
                "{}: {} {}→{} ({}) on {} [{} records]{}",
                side.designator,
                f.route(),
                f.dep_scheduled_time,
                f.arr_scheduled_time,
                f.duration_display(),
                weekday_label(f),
                f.observations,
                operated
            )
        })
        .collect()
}

/// Render a flight pair analysis.
#[must_use]
pub fn format_pair(analysis: &PairAnalysis) -> String {
    let mut lines = title_block(&format!(
        "Flight Pair Analysis: {} & {}",
        analysis.first.designator, analysis.second.designator
    ));
    lines.push(format!("Relationship: {}", analysis.relationship));
    lines.extend(pair_side_lines(&analysis.first));
    lines.extend(pair_side_lines(&analysis.second));
    if let (Some(first), Some(second)) = (analysis.first.primary(), analysis.second.primary()) {
        if analysis.turnaround_minutes.is_some() {
            lines.push(format!("Route pair: {} ↔ {}", first.route(), second.route()));
        }
    }
    if let Some(minutes) = analysis.turnaround_minutes {
        lines.push(format!(
            "Turnaround at {}: {}",
            analysis.second.primary().map_or("?", |f| f.dep_iata_code.as_str()),
            format_minutes(minutes)
        ));
    }
    lines.join("\n") + "\n"
}

/// Render a route summary followed by its flight table.
#[must_use]
pub fn format_route_summary(summary: &RouteSummary) -> String {
    let route = format!("{}→{}", summary.origin, summary.destination);
    let mut lines = title_block(&format!("Route Summary: {route}"));
    if summary.records == 0 {
        lines.push(NO_RESULTS.to_string());
        return lines.join("\n") + "\n";
    }

    let sources: Vec<String> = summary
        .sources
        .iter()
        .map(|(source, count)| format!("{source} {count}"))
        .collect();
    lines.push(format!("Records:        {}", summary.records));
    lines.push(format!("Unique flights: {}", summary.flights.len()));
    lines.push(format!("Airlines:       {}", summary.airlines.join(", ")));
    lines.push(format!("Aircraft types: {}", summary.aircraft_types.join(", ")));
    lines.push(format!("Sources:        {}", sources.join(", ")));
    lines.push(String::new());

    lines.join("\n") + "\n" + &format_table(&summary.flights, &format!("Flights {route}"))
}

/// Render an airline summary.
#[must_use]
pub fn format_airline_summary(summary: &AirlineSummary) -> String {
    let mut lines = title_block(&format!("Airline Summary: {}", summary.airline));
    if summary.records == 0 {
        lines.push(NO_RESULTS.to_string());
        return lines.join("\n") + "\n";
    }

    lines.push(format!("Records:        {}", summary.records));
    lines.push(format!("Unique flights: {}", summary.unique_flights));
    lines.push(format!("Unique routes:  {}", summary.routes.len()));
    lines.push(format!("Origins:        {}", summary.origins));
    lines.push(format!("Destinations:   {}", summary.destinations));
    lines.push(format!("Aircraft types: {}", summary.aircraft_types));
    lines.push(String::new());
    lines.push("Routes:".to_string());
    lines.extend(
        summary
            .routes
            .iter()
            .take(MAX_ROUTES_LISTED)
            .map(|route| format!("  {route}")),
    );
    if summary.routes.len() > MAX_ROUTES_LISTED {
        lines.push(format!("  ... and {} more", summary.routes.len() - MAX_ROUTES_LISTED));
    }
    lines.join("\n") + "\n"
}

/// Render store statistics; `scope` describes any filter applied.
#[must_use]
pub fn format_collection_summary(summary: &CollectionSummary, scope: &str) -> String {
    let mut lines = title_block(&format!("Collection Summary ({scope})"));
    let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    };
    lines.push(format!("Total flights:  {}", summary.total_flights));
    lines.push(format!("Airports:       {}", summary.airports));
    lines.push(format!("Airlines:       {}", summary.airlines));
    lines.push(format!("First record:   {}", stamp(summary.first_record)));
    lines.push(format!("Latest record:  {}", stamp(summary.latest_record)));
    lines.join("\n") + "\n"
}

/// Render the outcome of a collection run.
#[must_use]
pub fn format_collection_report(report: &CollectionReport) -> String {
    let mut lines = title_block("Collection Report");
    lines.push(format!(
        "Calls:     {} of {} succeeded",
        report.calls_attempted - report.calls_failed,
        report.calls_attempted
    ));
    lines.push(format!(
        "Records:   {} of {} inserted, {} duplicates, {} malformed",
        report.inserted, report.retrieved, report.duplicates, report.malformed
    ));
    for failure in &report.failures {
        lines.push(format!(
            "Failed:    {} {} {}: {}",
            failure.airport_code, failure.query_type, failure.date, failure.error
        ));
    }
    lines.join("\n") + "\n"
}

/// Render the outcome of importing one saved response.
#[must_use]
pub fn format_ingest_report(report: &IngestReport, source: &str) -> String {
    let mut lines = title_block(&format!("Import: {source}"));
    lines.push(format!(
        "Records:   {} of {} inserted, {} duplicates, {} malformed",
        report.inserted,
        report.retrieved,
        report.duplicates,
        report.malformed.len()
    ));
    for skipped in &report.malformed {
        lines.push(format!("Skipped:   record {}: {}", skipped.index, skipped.reason));
    }
    lines.join("\n") + "\n"
}

/// Render the probed table shape and the query-type distribution.
#[must_use]
pub fn format_schema_report(schema: &SchemaReport, distribution: &[(Option<String>, i64)]) -> String {
    let mut lines = title_block("Schema: flights");
    if !schema.table_exists() {
        lines.push("Table does not exist".to_string());
        return lines.join("\n") + "\n";
    }

    let name_width = schema
        .columns
        .iter()
        .map(|c| c.name.chars().count())
        .max()
        .unwrap_or(0);
    for column in &schema.columns {
        let mut flags = Vec::new();
        if column.primary_key {
            flags.push("PRIMARY KEY");
        }
        if column.not_null {
            flags.push("NOT NULL");
        }
        if column.has_default {
            flags.push("DEFAULT");
        }
        if schema.extra.contains(&column.name) {
            flags.push("(unknown)");
        }
        let line = format!("  {:<name_width$}  {} {}", column.name, column.decl_type, flags.join(" "));
        lines.push(line.trim_end().to_string());
    }
    if !schema.missing.is_empty() {
        lines.push(format!("Missing: {}", schema.missing.join(", ")));
    }
    if !schema.missing_optional.is_empty() {
        lines.push(format!(
            "Not tracked (codeshare): {}",
            schema.missing_optional.join(", ")
        ));
    }

    lines.push(String::new());
    lines.push("Query types:".to_string());
    if distribution.is_empty() {
        lines.push("  (no query_type column)".to_string());
    }
    for (value, count) in distribution {
        lines.push(format!("  {:<10} {}", value.as_deref().unwrap_or("NULL"), count));
    }
    lines.join("\n") + "\n"
}

/// Render a query-type back-fill report.
#[must_use]
pub fn format_backfill_report(report: &BackfillReport) -> String {
    let title = if report.applied {
        "query_type back-fill"
    } else {
        "query_type back-fill (dry run, use --yes to apply)"
    };
    let mut lines = title_block(title);
    if report.column_added {
        lines.push("Column query_type: added".to_string());
    }
    if !report.codeshare_columns.is_empty() {
        lines.push(format!("Codeshare columns added: {}", report.codeshare_columns.join(", ")));
    }
    lines.push(format!("Departures: {}", report.departures));
    lines.push(format!("Arrivals:   {}", report.arrivals));
    lines.push(format!("Normalized: {}", report.normalized));
    lines.push(format!("Ambiguous:  {}", report.ambiguous.len()));
    if !report.ambiguous.is_empty() {
        let ids: Vec<String> = report.ambiguous.iter().map(ToString::to_string).collect();
        lines.push(format!("Ambiguous row ids: {}", ids.join(", ")));
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::collect::CallFailure;
    use crate::consolidate::Relationship;
    use crate::flight::{OperatingFlight, QueryType, Weekdays};

    fn pr215() -> ConsolidatedFlight {
        ConsolidatedFlight {
            flight: "PR215".to_string(),
            airline_iata_code: "PR".to_string(),
            airline_name: "PHILIPPINE AIRLINES".to_string(),
            dep_iata_code: "MNL".to_string(),
            arr_iata_code: "POM".to_string(),
            dep_scheduled_time: "00:10".to_string(),
            arr_scheduled_time: "08:05".to_string(),
            dep_terminal: "1".to_string(),
            arr_terminal: String::new(),
            aircraft_model_code: "A321".to_string(),
            aircraft_model_text: "AIRBUS A321".to_string(),
            weekdays: Weekdays::from_days([2, 5, 7]).unwrap(),
            observations: 2,
            query_types: QueryType::ALL.into_iter().collect::<BTreeSet<_>>(),
            operated_by: None,
        }
    }

    fn pr216() -> ConsolidatedFlight {
        ConsolidatedFlight {
            flight: "PR216".to_string(),
            dep_iata_code: "POM".to_string(),
            arr_iata_code: "MNL".to_string(),
            dep_scheduled_time: "09:20".to_string(),
            arr_scheduled_time: "13:00".to_string(),
            observations: 1,
            ..pr215()
        }
    }

    #[test]
    fn test_format_table() {
        let text = format_table(&[pr215()], "Results");
        let widths = [6, 7, 6, 6, 8, 14, 8];
        let bar = |l: &str, m: &str, r: &str| {
            let segs: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("{l}{}{r}", segs.join(m))
        };
        let expected = [
            "Results".to_string(),
            "=======".to_string(),
            bar("┌", "┬", "┐"),
            "│ Flight │ Route   │ Depart │ Arrive │ Duration │ Operating Days │ Aircraft │".to_string(),
            bar("├", "┼", "┤"),
            "│ PR215  │ MNL→POM │ 00:10  │ 08:05  │ 7h55m    │ Tue,Fri,Sun    │ A321     │".to_string(),
            bar("└", "┴", "┘"),
            String::new(),
            "Total: 1 unique flights (2 database records)".to_string(),
        ]
        .join("\n")
            + "\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_format_table_marks_codeshares() {
        let marketing = ConsolidatedFlight {
            flight: "PX5215".to_string(),
            airline_iata_code: "PX".to_string(),
            operated_by: Some(OperatingFlight {
                airline_iata_code: "PR".to_string(),
                flight_iata_number: "PR215".to_string(),
            }),
            observations: 1,
            ..pr215()
        };
        let text = format_table(&[pr215(), marketing], "Results");
        assert!(text.contains("│ PX5215* │"));
        assert!(text.contains("│ PR215   │"));
        assert!(text.contains("\n\n* PX5215 operated by PR215\n\nTotal: 2 unique flights (3 database records)\n"));
    }

    #[test]
    fn test_format_table_widens_columns() {
        let mut flight = pr215();
        flight.aircraft_model_code = String::new();
        flight.aircraft_model_text = "BOEING 737-800 WINGLETS".to_string();
        let text = format_table(&[flight], "Results");

        assert!(text.contains("│ BOEING 737-800 WINGLETS │"));
        assert!(text.contains("│ Aircraft                │"));
    }

    #[test]
    fn test_format_table_empty() {
        assert_eq!(
            format_table(&[], "Flights MNL→POM"),
            "Flights MNL→POM\n===============\nNo flights found matching criteria\n"
        );
    }

    #[test]
    fn test_format_pair_round_trip() {
        let analysis = PairAnalysis {
            first: PairSide {
                designator: "PR215".to_string(),
                records: 2,
                flights: vec![pr215()],
            },
            second: PairSide {
                designator: "PR216".to_string(),
                records: 1,
                flights: vec![pr216()],
            },
            relationship: Relationship::RoundTrip,
            turnaround_minutes: Some(75),
        };
        let text = format_pair(&analysis);

        assert!(text.starts_with("Flight Pair Analysis: PR215 & PR216\n"));
        assert!(text.contains("Relationship: round trip"));
        assert!(text.contains("PR215: MNL→POM 00:10→08:05 (7h55m) on Tue,Fri,Sun [2 records]"));
        assert!(text.contains("Route pair: MNL→POM ↔ POM→MNL"));
        assert!(text.contains("Turnaround at POM: 1h15m"));
    }

    #[test]
    fn test_format_pair_undetermined() {
        let analysis = PairAnalysis {
            first: PairSide {
                designator: "PR215".to_string(),
                records: 1,
                flights: vec![pr215()],
            },
            second: PairSide {
                designator: "PR999".to_string(),
                records: 0,
                flights: vec![],
            },
            relationship: Relationship::Undetermined,
            turnaround_minutes: None,
        };
        let text = format_pair(&analysis);
        assert!(text.contains("PR999: no data"));
        assert!(!text.contains("Turnaround"));
    }

    #[test]
    fn test_format_route_summary() {
        let summary = RouteSummary {
            origin: "MNL".to_string(),
            destination: "POM".to_string(),
            records: 2,
            airlines: vec!["PR".to_string()],
            aircraft_types: vec!["AIRBUS A321".to_string()],
            sources: BTreeMap::from([("arrival".to_string(), 1), ("departure".to_string(), 1)]),
            flights: vec![pr215()],
        };
        let text = format_route_summary(&summary);
        assert!(text.starts_with("Route Summary: MNL→POM\n"));
        assert!(text.contains("Unique flights: 1"));
        assert!(text.contains("Sources:        arrival 1, departure 1"));
        assert!(text.contains("Flights MNL→POM"));
        assert!(text.contains("│ PR215  │"));
    }

    #[test]
    fn test_format_airline_summary_truncates_routes() {
        let summary = AirlineSummary {
            airline: "PR".to_string(),
            records: 30,
            unique_flights: 25,
            origins: 5,
            destinations: 6,
            aircraft_types: 3,
            routes: (0..25).map(|i| format!("MNL→X{i:02}")).collect(),
        };
        let text = format_airline_summary(&summary);
        assert!(text.contains("Unique routes:  25"));
        assert!(text.contains("  MNL→X19"));
        assert!(!text.contains("  MNL→X20"));
        assert!(text.contains("... and 5 more"));
    }

    #[test]
    fn test_format_collection_report() {
        let report = CollectionReport {
            calls_attempted: 14,
            calls_failed: 1,
            retrieved: 50,
            inserted: 47,
            duplicates: 3,
            malformed: 0,
            failures: vec![CallFailure {
                airport_code: "POM".to_string(),
                query_type: QueryType::Arrival,
                date: chrono::NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
                error: "rate limited by schedules API".to_string(),
            }],
        };
        let text = format_collection_report(&report);
        assert!(text.contains("Calls:     13 of 14 succeeded"));
        assert!(text.contains("Records:   47 of 50 inserted, 3 duplicates, 0 malformed"));
        assert!(text.contains("Failed:    POM arrival 2025-10-01: rate limited"));
    }

    #[test]
    fn test_format_ingest_report() {
        let report = IngestReport {
            retrieved: 10,
            inserted: 9,
            duplicates: 0,
            malformed: vec![crate::storage::SkippedRecord {
                index: 3,
                reason: "missing flight number".to_string(),
            }],
        };
        let text = format_ingest_report(&report, "mnl.json");
        assert!(text.starts_with("Import: mnl.json\n"));
        assert!(text.contains("Records:   9 of 10 inserted, 0 duplicates, 1 malformed"));
        assert!(text.contains("Skipped:   record 3: missing flight number"));
    }

    #[test]
    fn test_format_collection_summary_empty() {
        let summary = CollectionSummary {
            total_flights: 0,
            airports: 0,
            airlines: 0,
            first_record: None,
            latest_record: None,
        };
        let text = format_collection_summary(&summary, "all airports");
        assert!(text.starts_with("Collection Summary (all airports)\n"));
        assert!(text.contains("First record:   -"));
    }

    #[test]
    fn test_format_backfill_dry_run() {
        let report = BackfillReport {
            column_added: true,
            departures: 3,
            arrivals: 2,
            normalized: 0,
            ambiguous: vec![7, 9],
            codeshare_columns: vec!["is_codeshare".to_string()],
            applied: false,
        };
        let text = format_backfill_report(&report);
        assert!(text.contains("dry run"));
        assert!(text.contains("Codeshare columns added: is_codeshare"));
        assert!(text.contains("Column query_type: added"));
        assert!(text.contains("Ambiguous row ids: 7, 9"));
    }

    #[test]
    fn test_format_schema_report() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::storage::schema::create_schema(&conn).unwrap();
        let schema = crate::storage::probe(&conn).unwrap();

        let text = format_schema_report(&schema, &[(None, 2), (Some("departure".to_string()), 5)]);
        assert!(text.contains("id"));
        assert!(text.contains("PRIMARY KEY"));
        assert!(text.contains("query_type"));
        assert!(text.contains("  NULL       2"));
        assert!(text.contains("  departure  5"));
        assert!(!text.contains("Missing"));
    }
}
