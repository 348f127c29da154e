//! `SQLite` schema definitions and live-schema probing for flightsched.
//!
//! The `flights` table is versioned out-of-band from the code, so the live
//! shape is read with `PRAGMA table_info` and compared against the columns
//! this crate reads and writes.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Name of the single data table.
pub const FLIGHTS_TABLE: &str = "flights";

/// SQL statement to create the flights table.
pub const CREATE_FLIGHTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    weekdays TEXT NOT NULL,
    airport_code TEXT NOT NULL,
    query_type TEXT,
    dep_iata_code TEXT,
    dep_icao_code TEXT,
    dep_terminal TEXT,
    dep_gate TEXT,
    dep_scheduled_time TEXT,
    arr_iata_code TEXT,
    arr_icao_code TEXT,
    arr_terminal TEXT,
    arr_gate TEXT,
    arr_scheduled_time TEXT,
    aircraft_model_code TEXT,
    aircraft_model_text TEXT,
    airline_name TEXT,
    airline_iata_code TEXT,
    airline_icao_code TEXT,
    flight_number TEXT,
    flight_iata_number TEXT,
    flight_icao_number TEXT,
    raw_data TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_codeshare INTEGER,
    operating_airline_iata TEXT,
    operating_flight_number TEXT,
    marketing_airline_iata TEXT,
    marketing_flight_number TEXT,
    codeshare_group_id TEXT
)
";

/// SQL statement to create an index supporting the signature lookup.
pub const CREATE_SIGNATURE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flights_signature
ON flights(flight_iata_number, dep_iata_code, arr_iata_code, dep_scheduled_time, query_type)
";

/// SQL statement to create an index on the route for searches.
pub const CREATE_ROUTE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flights_route ON flights(dep_iata_code, arr_iata_code)
";

/// SQL statement to create an index on the airline for searches.
pub const CREATE_AIRLINE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flights_airline ON flights(airline_iata_code)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_FLIGHTS_TABLE,
    CREATE_SIGNATURE_INDEX,
    CREATE_ROUTE_INDEX,
    CREATE_AIRLINE_INDEX,
];

/// Columns the crate reads and writes, in insert order (excluding `id`).
pub const REQUIRED_COLUMNS: &[&str] = &[
    "weekdays",
    "airport_code",
    "query_type",
    "dep_iata_code",
    "dep_icao_code",
    "dep_terminal",
    "dep_gate",
    "dep_scheduled_time",
    "arr_iata_code",
    "arr_icao_code",
    "arr_terminal",
    "arr_gate",
    "arr_scheduled_time",
    "aircraft_model_code",
    "aircraft_model_text",
    "airline_name",
    "airline_iata_code",
    "airline_icao_code",
    "flight_number",
    "flight_iata_number",
    "flight_icao_number",
    "raw_data",
    "created_at",
    "updated_at",
];

/// Nullable codeshare columns, written and read only when the live table has
/// them. Tables created before codeshare tracking stay usable without them.
pub const CODESHARE_COLUMNS: &[&str] = &[
    "is_codeshare",
    "operating_airline_iata",
    "operating_flight_number",
    "marketing_airline_iata",
    "marketing_flight_number",
    "codeshare_group_id",
];

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub decl_type: String,
    /// Whether the column is `NOT NULL`.
    pub not_null: bool,
    /// Whether the column has a default value.
    pub has_default: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

/// The probed shape of the live `flights` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    /// All columns in table order.
    pub columns: Vec<ColumnInfo>,
    /// Required columns the table lacks.
    pub missing: Vec<String>,
    /// Columns present in the table but unknown to this crate.
    pub extra: Vec<String>,
    /// Codeshare columns the table lacks.
    pub missing_optional: Vec<String>,
}

impl SchemaReport {
    /// Whether the table exists at all.
    #[must_use]
    pub fn table_exists(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Whether a given column is present.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Whether codeshare details can be read back from this table.
    #[must_use]
    pub fn tracks_codeshares(&self) -> bool {
        ["is_codeshare", "operating_airline_iata", "operating_flight_number"]
            .iter()
            .all(|name| self.has_column(name))
    }

    /// Extra columns an insert could not satisfy (`NOT NULL` without default).
    #[must_use]
    pub fn blocking_extra(&self) -> Vec<&ColumnInfo> {
        self.columns
            .iter()
            .filter(|c| self.extra.contains(&c.name))
            .filter(|c| c.not_null && !c.has_default && !c.primary_key)
            .collect()
    }

    /// Check that reads and writes against this table can succeed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the table is absent, lacks a
    /// required column, or has an extra column that inserts cannot fill.
    pub fn verify(&self) -> Result<()> {
        if !self.table_exists() {
            return Err(Error::schema_mismatch(
                REQUIRED_COLUMNS.iter().map(ToString::to_string).collect(),
                "table does not exist",
            ));
        }

        let mut problems = Vec::new();
        if !self.missing.is_empty() {
            problems.push(format!("missing columns: {}", self.missing.join(", ")));
        }
        let blocking: Vec<&str> = self
            .blocking_extra()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        if !blocking.is_empty() {
            problems.push(format!(
                "unknown NOT NULL columns without default: {}",
                blocking.join(", ")
            ));
        }

        if problems.is_empty() {
            if !self.missing_optional.is_empty() {
                debug!(
                    "flights table has no codeshare columns: {}",
                    self.missing_optional.join(", ")
                );
            }
            if !self.extra.is_empty() {
                warn!(
                    "flights table has columns unknown to this version: {}",
                    self.extra.join(", ")
                );
            }
            Ok(())
        } else {
            let mut details = problems.join("; ");
            if self.missing.iter().any(|c| c == "query_type") {
                details.push_str(" (run `fsched migrate` to add and back-fill query_type)");
            }
            Err(Error::schema_mismatch(self.missing.clone(), details))
        }
    }
}

/// Probe the live shape of the `flights` table.
///
/// # Errors
///
/// Returns an error if the pragma query fails.
pub fn probe(conn: &Connection) -> Result<SchemaReport> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([FLIGHTS_TABLE], |row| {
            let default: Option<String> = row.get(3)?;
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                has_default: default.is_some(),
                primary_key: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let missing = REQUIRED_COLUMNS
        .iter()
        .filter(|name| !columns.iter().any(|c| c.name == **name))
        .map(ToString::to_string)
        .collect();
    let extra = columns
        .iter()
        .filter(|c| {
            c.name != "id"
                && !REQUIRED_COLUMNS.contains(&c.name.as_str())
                && !CODESHARE_COLUMNS.contains(&c.name.as_str())
        })
        .map(|c| c.name.clone())
        .collect();
    let missing_optional = if columns.is_empty() {
        Vec::new()
    } else {
        CODESHARE_COLUMNS
            .iter()
            .filter(|name| !columns.iter().any(|c| c.name == **name))
            .map(ToString::to_string)
            .collect()
    };

    let report = SchemaReport {
        columns,
        missing,
        extra,
        missing_optional,
    };
    debug!(
        "Probed flights schema: {} columns, {} missing, {} extra",
        report.columns.len(),
        report.missing.len(),
        report.extra.len()
    );
    Ok(report)
}

/// Row counts per stored `query_type` value, NULL as `None`.
///
/// Returns an empty list when the table or the column does not exist.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn query_type_distribution(conn: &Connection) -> Result<Vec<(Option<String>, i64)>> {
    if !probe(conn)?.has_column("query_type") {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT query_type, COUNT(*) FROM flights GROUP BY query_type ORDER BY query_type",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create the table and indexes if they do not exist.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn create_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }
    Ok(())
}
