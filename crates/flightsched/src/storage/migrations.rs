//! One-time data migrations for the `flights` table.
//!
//! The table's shape is managed outside this crate, so migrations here are
//! explicit, user-confirmed steps rather than something run on open. The
//! migration back-fills `query_type` on legacy rows collected before the column
//! existed, and adds the nullable codeshare columns to older tables.

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::schema::{probe, CODESHARE_COLUMNS, FLIGHTS_TABLE};
use crate::error::{Error, Result};
use crate::flight::QueryType;

/// Outcome of a `query_type` back-fill (or its dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Whether the `query_type` column had to be added.
    pub column_added: bool,
    /// Rows resolved (or resolvable) as departures.
    pub departures: usize,
    /// Rows resolved (or resolvable) as arrivals.
    pub arrivals: usize,
    /// Rows whose stored value only needed case normalization.
    pub normalized: usize,
    /// Ids of rows the heuristic could not classify; left untouched.
    pub ambiguous: Vec<i64>,
    /// Codeshare columns that were (or would be) added.
    pub codeshare_columns: Vec<String>,
    /// Whether changes were written (false for a dry run).
    pub applied: bool,
}

impl BackfillReport {
    /// Total rows that were (or would be) updated.
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.departures + self.arrivals + self.normalized
    }
}

/// Classify a legacy row by where its anchor airport sits on the route.
///
/// The anchor matching only the departure code means the row came from a
/// departures query; matching only the arrival code means an arrivals query.
/// Matching both or neither cannot be decided and returns `None`.
#[must_use]
pub fn infer_query_type(airport_code: &str, dep_iata_code: &str, arr_iata_code: &str) -> Option<QueryType> {
    let airport = airport_code.trim();
    if airport.is_empty() {
        return None;
    }
    let is_dep = airport.eq_ignore_ascii_case(dep_iata_code.trim());
    let is_arr = airport.eq_ignore_ascii_case(arr_iata_code.trim());
    match (is_dep, is_arr) {
        (true, false) => Some(QueryType::Departure),
        (false, true) => Some(QueryType::Arrival),
        _ => None,
    }
}

struct Candidate {
    id: i64,
    current: Option<String>,
    airport_code: String,
    dep_iata_code: String,
    arr_iata_code: String,
}

/// Add and back-fill the `query_type` column.
///
/// Rows whose `query_type` is NULL, empty, or not one of the lowercase values
/// are considered. A value that is valid apart from case is lowercased;
/// otherwise [`infer_query_type`] decides. Ambiguous rows are logged and left
/// as they are.
///
/// With `confirmed == false` nothing is written and the report describes what
/// would happen.
///
/// # Errors
///
/// Returns an error if the table or the columns the heuristic needs are
/// missing, or if a statement fails. All updates run in one transaction.
pub fn backfill_query_type(conn: &mut Connection, confirmed: bool) -> Result<BackfillReport> {
    let schema = probe(conn)?;
    if !schema.table_exists() {
        return Err(Error::DatabaseMigration {
            message: format!("table '{FLIGHTS_TABLE}' does not exist"),
        });
    }
    for column in ["airport_code", "dep_iata_code", "arr_iata_code"] {
        if !schema.has_column(column) {
            return Err(Error::DatabaseMigration {
                message: format!("cannot infer query_type without column '{column}'"),
            });
        }
    }

    let mut report = BackfillReport {
        column_added: !schema.has_column("query_type"),
        codeshare_columns: schema.missing_optional.clone(),
        applied: confirmed,
        ..BackfillReport::default()
    };

    let select = if report.column_added {
        "SELECT id, NULL, airport_code, dep_iata_code, arr_iata_code FROM flights ORDER BY id"
    } else {
        r"
        SELECT id, query_type, airport_code, dep_iata_code, arr_iata_code FROM flights
        WHERE query_type IS NULL OR query_type NOT IN ('departure', 'arrival')
        ORDER BY id
        "
    };
    let candidates = {
        let mut stmt = conn.prepare(select)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Candidate {
                    id: row.get(0)?,
                    current: row.get(1)?,
                    airport_code: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    dep_iata_code: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    arr_iata_code: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };
    debug!("{} rows need a query_type", candidates.len());
    let touch_updated_at = schema.has_column("updated_at");

    let tx = conn.transaction()?;
    if report.column_added && confirmed {
        tx.execute_batch("ALTER TABLE flights ADD COLUMN query_type TEXT")?;
        info!("Added query_type column to flights");
    }
    if confirmed {
        for column in &report.codeshare_columns {
            let decl_type = if column == "is_codeshare" { "INTEGER" } else { "TEXT" };
            tx.execute_batch(&format!("ALTER TABLE flights ADD COLUMN {column} {decl_type}"))?;
        }
        if !report.codeshare_columns.is_empty() {
            info!("Added codeshare columns: {}", report.codeshare_columns.join(", "));
        }
    }

    for candidate in candidates {
        let existing = candidate
            .current
            .as_deref()
            .and_then(|value| value.parse::<QueryType>().ok());

        let resolved = if let Some(query_type) = existing {
            report.normalized += 1;
            Some(query_type)
        } else {
            let inferred = infer_query_type(
                &candidate.airport_code,
                &candidate.dep_iata_code,
                &candidate.arr_iata_code,
            );
            match inferred {
                Some(QueryType::Departure) => report.departures += 1,
                Some(QueryType::Arrival) => report.arrivals += 1,
                None => {
                    warn!(
                        "Row {} is ambiguous: airport {:?}, route {:?} -> {:?}",
                        candidate.id,
                        candidate.airport_code,
                        candidate.dep_iata_code,
                        candidate.arr_iata_code
                    );
                    report.ambiguous.push(candidate.id);
                }
            }
            inferred
        };

        if let (Some(query_type), true) = (resolved, confirmed) {
            if touch_updated_at {
                tx.execute(
                    "UPDATE flights SET query_type = ?1, updated_at = ?2 WHERE id = ?3",
                    params![query_type.as_str(), chrono::Utc::now().to_rfc3339(), candidate.id],
                )?;
            } else {
                tx.execute(
                    "UPDATE flights SET query_type = ?1 WHERE id = ?2",
                    params![query_type.as_str(), candidate.id],
                )?;
            }
        }
    }

    if confirmed {
        tx.commit()?;
        info!(
            "Back-filled query_type on {} rows ({} ambiguous)",
            report.resolved(),
            report.ambiguous.len()
        );
    } else {
        tx.rollback()?;
    }
    Ok(report)
}
