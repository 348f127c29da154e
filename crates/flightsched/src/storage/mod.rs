//! Storage layer for flightsched.
//!
//! This module provides `SQLite`-based persistent storage for observed flight
//! schedules: signature-based deduplication on insert, filtered reads for the
//! search engine, and collection statistics.

pub mod migrations;
pub mod schema;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flight::{FlightRecord, LogicalFlightKey, OperatingFlight, QueryType, Signature, Weekdays};
use crate::normalize::normalize;

pub use migrations::{backfill_query_type, BackfillReport};
pub use schema::{probe, ColumnInfo, SchemaReport};

/// Columns selected for every read, matching [`Storage::row_to_flight`].
const SELECT_COLUMNS: &str = r"
    id, weekdays, airport_code, query_type,
    dep_iata_code, dep_icao_code, dep_terminal, dep_gate, dep_scheduled_time,
    arr_iata_code, arr_icao_code, arr_terminal, arr_gate, arr_scheduled_time,
    aircraft_model_code, aircraft_model_text,
    airline_name, airline_iata_code, airline_icao_code,
    flight_number, flight_iata_number, flight_icao_number,
    raw_data, created_at, updated_at
";

/// Codeshare columns appended to [`SELECT_COLUMNS`] when the table has them.
const CODESHARE_SELECT: &str = ", is_codeshare, operating_airline_iata, operating_flight_number";

/// Index of `is_codeshare` in a row selected with [`CODESHARE_SELECT`].
const CODESHARE_INDEX: usize = 25;

/// Expression for the flight designator half of the signature.
const DESIGNATOR_SQL: &str =
    "CASE WHEN IFNULL(flight_iata_number, '') = '' THEN IFNULL(flight_number, '') ELSE flight_iata_number END";

/// A row read back from the `flights` table.
///
/// Unlike [`FlightRecord`], `query_type` is optional: legacy rows the back-fill
/// could not classify keep a NULL value and are still searchable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightRow {
    /// Row identifier.
    pub id: i64,
    /// Days of operation recorded on this row.
    pub weekdays: Weekdays,
    /// Query anchor airport.
    pub airport_code: String,
    /// Query perspective, if known.
    pub query_type: Option<QueryType>,
    /// Departure airport IATA code.
    pub dep_iata_code: String,
    /// Departure airport ICAO code.
    pub dep_icao_code: String,
    /// Departure terminal.
    pub dep_terminal: String,
    /// Departure gate.
    pub dep_gate: String,
    /// Scheduled departure time.
    pub dep_scheduled_time: String,
    /// Arrival airport IATA code.
    pub arr_iata_code: String,
    /// Arrival airport ICAO code.
    pub arr_icao_code: String,
    /// Arrival terminal.
    pub arr_terminal: String,
    /// Arrival gate.
    pub arr_gate: String,
    /// Scheduled arrival time.
    pub arr_scheduled_time: String,
    /// Aircraft model code.
    pub aircraft_model_code: String,
    /// Aircraft model description.
    pub aircraft_model_text: String,
    /// Airline name.
    pub airline_name: String,
    /// Airline IATA code.
    pub airline_iata_code: String,
    /// Airline ICAO code.
    pub airline_icao_code: String,
    /// Bare flight number.
    pub flight_number: String,
    /// IATA flight designator.
    pub flight_iata_number: String,
    /// ICAO flight designator.
    pub flight_icao_number: String,
    /// Operating carrier, when the row is a codeshare.
    pub codeshare: Option<OperatingFlight>,
    /// Original API object.
    #[serde(skip)]
    pub raw_data: String,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last touched.
    pub updated_at: DateTime<Utc>,
}

impl FlightRow {
    /// The flight designator: IATA number, else bare number.
    #[must_use]
    pub fn designator(&self) -> &str {
        if self.flight_iata_number.is_empty() {
            &self.flight_number
        } else {
            &self.flight_iata_number
        }
    }

    /// The logical flight this row observes.
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
}

/// Literal row filters; `None` matches everything.
///
/// Values are compared exactly after trimming and uppercasing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Departure airport IATA code.
    pub origin: Option<String>,
    /// Arrival airport IATA code.
    pub destination: Option<String>,
    /// Airline IATA code.
    pub airline: Option<String>,
    /// Flight designator, matched against the IATA number or the bare number.
    pub flight: Option<String>,
}

/// Outcome of [`Storage::insert_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    /// Records handed in.
    pub submitted: usize,
    /// Records newly written.
    pub inserted: usize,
    /// Records whose signature already existed.
    pub duplicates: usize,
}

/// A raw record that [`Storage::ingest`] skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Position in the submitted slice.
    pub index: usize,
    /// Why normalization rejected it.
    pub reason: String,
}

/// Outcome of [`Storage::ingest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Raw objects received.
    pub retrieved: usize,
    /// Rows newly written.
    pub inserted: usize,
    /// Valid records that already existed.
    pub duplicates: usize,
    /// Records rejected by normalization.
    pub malformed: Vec<SkippedRecord>,
}

/// Aggregate statistics over (a filtered part of) the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    /// Matching rows.
    pub total_flights: i64,
    /// Distinct query anchor airports.
    pub airports: i64,
    /// Distinct airline IATA codes.
    pub airlines: i64,
    /// Creation time of the oldest matching row.
    pub first_record: Option<DateTime<Utc>>,
    /// Creation time of the newest matching row.
    pub latest_record: Option<DateTime<Utc>>,
}

/// Storage engine for flight schedule observations.
///
/// The live table shape is verified once, when the storage is opened; a
/// mismatch refuses to hand out a `Storage` at all, so no write is attempted
/// against a drifted table.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
    /// The verified table shape.
    schema: SchemaReport,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist,
    /// and the `flights` table if the database has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table does not
    /// have the expected shape.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = connect(&path)?;
        if !schema::probe(&conn)?.table_exists() {
            info!("Creating flights table in {}", path.display());
            schema::create_schema(&conn)?;
        }
        Self::from_connection(conn, path)
    }

    /// Open a database that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseMissing`] if the file is absent, or a schema
    /// error if the table is missing or drifted.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::DatabaseMissing { path });
        }
        let conn = connect(&path)?;
        Self::from_connection(conn, path)
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        schema::create_schema(&conn)?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    /// Wrap an open connection after verifying the table shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the table cannot be used.
    pub fn from_connection(conn: Connection, path: PathBuf) -> Result<Self> {
        let schema = schema::probe(&conn)?;
        schema.verify()?;
        debug!("Database ready at {}", path.display());
        Ok(Self { path, conn, schema })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The table shape verified at open.
    #[must_use]
    pub fn schema(&self) -> &SchemaReport {
        &self.schema
    }

    /// Insert a record unless its signature is already stored.
    ///
    /// Returns the assigned ID, or `None` if the record was a duplicate. The
    /// check and the insert run in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, record: &FlightRecord) -> Result<Option<i64>> {
        let signature = record.signature();
        let tx = self.conn.unchecked_transaction()?;

        if Self::signature_exists(&tx, &signature)? {
            debug!("Skipping duplicate {}", signature);
            return Ok(None);
        }

        let (columns, values): (Vec<&str>, Vec<SqlValue>) = record_columns(record)
            .into_iter()
            .filter(|(column, _)| {
                !schema::CODESHARE_COLUMNS.contains(column) || self.schema.has_column(column)
            })
            .unzip();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO flights ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        tx.execute(&sql, params_from_iter(values.iter()))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!("Inserted {} with id {}", signature, id);
        Ok(Some(id))
    }

    /// Insert records one by one, skipping duplicates.
    ///
    /// The batch as a whole is not atomic: a failure part-way leaves earlier
    /// records committed, and re-running the batch is idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first database error encountered.
    pub fn insert_batch(&self, records: &[FlightRecord]) -> Result<InsertReport> {
        let mut report = InsertReport {
            submitted: records.len(),
            ..InsertReport::default()
        };
        let mut seen = HashSet::new();

        for record in records {
            let digest = record.signature().digest();
            if !seen.insert(digest) {
                debug!("Duplicate within batch: {}", record.signature());
                report.duplicates += 1;
                continue;
            }
            match self.insert(record)? {
                Some(_) => report.inserted += 1,
                None => report.duplicates += 1,
            }
        }

        debug!(
            "Batch: {} submitted, {} inserted, {} duplicates",
            report.submitted, report.inserted, report.duplicates
        );
        Ok(report)
    }

    /// Normalize raw API objects and insert the valid ones.
    ///
    /// Malformed objects are logged, counted and skipped; they never fail the
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    pub fn ingest(&self, raws: &[Value], query_type: QueryType, airport_code: &str) -> Result<IngestReport> {
        let mut records = Vec::with_capacity(raws.len());
        let mut malformed = Vec::new();

        for (index, raw) in raws.iter().enumerate() {
            match normalize(raw, query_type, airport_code) {
                Ok(record) => records.push(record),
                Err(Error::MalformedRecord { reason }) => {
                    warn!("Skipping record {} from {} {}: {}", index, airport_code, query_type, reason);
                    malformed.push(SkippedRecord { index, reason });
                }
                Err(e) => return Err(e),
            }
        }

        let inserted = self.insert_batch(&records)?;
        Ok(IngestReport {
            retrieved: raws.len(),
            inserted: inserted.inserted,
            duplicates: inserted.duplicates,
            malformed,
        })
    }

    fn signature_exists(conn: &Connection, signature: &Signature) -> Result<bool> {
        let sql = format!(
            r"
            SELECT 1 FROM flights
            WHERE {DESIGNATOR_SQL} = ?1
              AND IFNULL(dep_iata_code, '') = ?2
              AND IFNULL(arr_iata_code, '') = ?3
              AND IFNULL(dep_scheduled_time, '') = ?4
              AND query_type = ?5
            LIMIT 1
            "
        );
        let found = conn
            .query_row(
                &sql,
                params![
                    signature.flight,
                    signature.dep_iata_code,
                    signature.arr_iata_code,
                    signature.dep_scheduled_time,
                    signature.query_type.as_str(),
                ],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Get a row by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<FlightRow>> {
        let sql = format!("SELECT {} FROM flights WHERE id = ?1", self.select_columns());
        let row = self
            .conn
            .query_row(&sql, [id], Self::row_to_flight)
            .optional()?;
        Ok(row)
    }

    /// Get every row matching the filter, ordered by designator, departure
    /// time and id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_rows(&self, filter: &RowFilter) -> Result<Vec<FlightRow>> {
        let sql = format!(
            r"
            SELECT {} FROM flights
            WHERE (?1 IS NULL OR dep_iata_code = ?1)
              AND (?2 IS NULL OR arr_iata_code = ?2)
              AND (?3 IS NULL OR airline_iata_code = ?3)
              AND (?4 IS NULL OR flight_iata_number = ?4 OR flight_number = ?4)
            ORDER BY {DESIGNATOR_SQL}, dep_scheduled_time, id
            ",
            self.select_columns()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    upper(filter.origin.as_deref()),
                    upper(filter.destination.as_deref()),
                    upper(filter.airline.as_deref()),
                    upper(filter.flight.as_deref()),
                ],
                Self::row_to_flight,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!("{} rows match {:?}", rows.len(), filter);
        Ok(rows)
    }

    /// Count total rows in storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM flights", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Summarize rows, optionally restricted to an anchor airport and/or
    /// query type.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn summary(&self, airport_code: Option<&str>, query_type: Option<QueryType>) -> Result<CollectionSummary> {
        let (total_flights, airports, airlines, first, latest) = self.conn.query_row(
            r"
            SELECT COUNT(*), COUNT(DISTINCT airport_code), COUNT(DISTINCT airline_iata_code),
                   MIN(created_at), MAX(created_at)
            FROM flights
            WHERE (?1 IS NULL OR airport_code = ?1)
              AND (?2 IS NULL OR query_type = ?2)
            ",
            params![upper(airport_code), query_type.map(QueryType::as_str)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )?;

        Ok(CollectionSummary {
            total_flights,
            airports,
            airlines,
            first_record: first.as_deref().and_then(parse_timestamp),
            latest_record: latest.as_deref().and_then(parse_timestamp),
        })
    }

    /// Row counts per stored `query_type` value (`None` for NULL).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_type_distribution(&self) -> Result<Vec<(Option<String>, i64)>> {
        schema::query_type_distribution(&self.conn)
    }

    /// The column list for reads against the live table.
    fn select_columns(&self) -> String {
        if self.schema.tracks_codeshares() {
            format!("{SELECT_COLUMNS}{CODESHARE_SELECT}")
        } else {
            SELECT_COLUMNS.to_string()
        }
    }

    /// Convert a database row to a [`FlightRow`].
    fn row_to_flight(row: &rusqlite::Row) -> rusqlite::Result<FlightRow> {
        let id: i64 = row.get(0)?;
        let text = |idx: usize| -> rusqlite::Result<String> {
            Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
        };

        let weekdays_str = text(1)?;
        let weekdays = Weekdays::parse(&weekdays_str).unwrap_or_else(|_| {
            warn!("Row {} has unreadable weekdays {:?}", id, weekdays_str);
            Weekdays::empty()
        });
        let query_type = row
            .get::<_, Option<String>>(3)?
            .and_then(|value| value.parse().ok());
        let statement: &rusqlite::Statement<'_> = row.as_ref();
        let codeshare = if statement.column_count() > CODESHARE_INDEX
            && row.get::<_, Option<i64>>(CODESHARE_INDEX)?.unwrap_or(0) != 0
        {
            Some(OperatingFlight {
                airline_iata_code: text(CODESHARE_INDEX + 1)?,
                flight_iata_number: text(CODESHARE_INDEX + 2)?,
            })
        } else {
            None
        };

        Ok(FlightRow {
            id,
            weekdays,
            airport_code: text(2)?,
            query_type,
            dep_iata_code: text(4)?,
            dep_icao_code: text(5)?,
            dep_terminal: text(6)?,
            dep_gate: text(7)?,
            dep_scheduled_time: text(8)?,
            arr_iata_code: text(9)?,
            arr_icao_code: text(10)?,
            arr_terminal: text(11)?,
            arr_gate: text(12)?,
            arr_scheduled_time: text(13)?,
            aircraft_model_code: text(14)?,
            aircraft_model_text: text(15)?,
            airline_name: text(16)?,
            airline_iata_code: text(17)?,
            airline_icao_code: text(18)?,
            flight_number: text(19)?,
            flight_iata_number: text(20)?,
            flight_icao_number: text(21)?,
            codeshare,
            raw_data: text(22)?,
            created_at: parse_timestamp(&text(23)?).unwrap_or(DateTime::<Utc>::MIN_UTC),
            updated_at: parse_timestamp(&text(24)?).unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
    }
}

/// Open a connection to an existing or new database file without verifying
/// the table shape. Used by the diagnostic and migration commands.
///
/// # Errors
///
/// Returns [`Error::DatabaseOpen`] if `SQLite` cannot open the file.
pub fn connect(path: &Path) -> Result<Connection> {
    debug!("Opening database at {}", path.display());
    let conn = Connection::open(path).map_err(|source| Error::DatabaseOpen {
        path: path.to_path_buf(),
        source,
    })?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Every column written for a record, in insert order.
fn record_columns(record: &FlightRecord) -> Vec<(&'static str, SqlValue)> {
    let text = |value: &str| SqlValue::Text(value.to_string());
    vec![
        ("weekdays", SqlValue::Text(record.weekdays.to_string())),
        ("airport_code", text(&record.airport_code)),
        ("query_type", text(record.query_type.as_str())),
        ("dep_iata_code", text(&record.dep_iata_code)),
        ("dep_icao_code", text(&record.dep_icao_code)),
        ("dep_terminal", text(&record.dep_terminal)),
        ("dep_gate", text(&record.dep_gate)),
        ("dep_scheduled_time", text(&record.dep_scheduled_time)),
        ("arr_iata_code", text(&record.arr_iata_code)),
        ("arr_icao_code", text(&record.arr_icao_code)),
        ("arr_terminal", text(&record.arr_terminal)),
        ("arr_gate", text(&record.arr_gate)),
        ("arr_scheduled_time", text(&record.arr_scheduled_time)),
        ("aircraft_model_code", text(&record.aircraft_model_code)),
        ("aircraft_model_text", text(&record.aircraft_model_text)),
        ("airline_name", text(&record.airline_name)),
        ("airline_iata_code", text(&record.airline_iata_code)),
        ("airline_icao_code", text(&record.airline_icao_code)),
        ("flight_number", text(&record.flight_number)),
        ("flight_iata_number", text(&record.flight_iata_number)),
        ("flight_icao_number", text(&record.flight_icao_number)),
        ("raw_data", text(&record.raw_data)),
        ("created_at", SqlValue::Text(record.created_at.to_rfc3339())),
        ("updated_at", SqlValue::Text(record.updated_at.to_rfc3339())),
        ("is_codeshare", SqlValue::Integer(i64::from(record.is_codeshare()))),
        ("operating_airline_iata", text(record.operating_airline_iata())),
        ("operating_flight_number", text(record.operating_flight_number())),
        ("marketing_airline_iata", text(&record.airline_iata_code)),
        ("marketing_flight_number", text(record.designator())),
        ("codeshare_group_id", SqlValue::Text(record.codeshare_group_id())),
    ]
}

fn upper(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_uppercase())
        .filter(|v| !v.is_empty())
}

/// Parse a stored timestamp: RFC 3339, or `SQLite`'s `YYYY-MM-DD HH:MM:SS`.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::fixtures::record;
    use crate::normalize::fixtures::raw_flight;

    fn pr215_departure() -> FlightRecord {
        record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[2, 7])
    }

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(storage.path(), Path::new(":memory:"));
        assert!(storage.schema().missing.is_empty());
    }

    #[test]
    fn test_insert_and_get() {
        let storage = Storage::open_in_memory().unwrap();
        let id = storage.insert(&pr215_departure()).unwrap().unwrap();

        let row = storage.get(id).unwrap().unwrap();
        assert_eq!(row.designator(), "PR215");
        assert_eq!(row.query_type, Some(QueryType::Departure));
        assert_eq!(row.weekdays.to_string(), "2,7");
        assert_eq!(row.dep_scheduled_time, "00:10");
        assert_eq!(row.aircraft_model_code, "A321");

        assert!(storage.get(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_is_noop() {
        let storage = Storage::open_in_memory().unwrap();
        let first = pr215_departure();
        assert!(storage.insert(&first).unwrap().is_some());

        let mut again = pr215_departure();
        again.weekdays = Weekdays::from_days([5]).unwrap();
        assert!(storage.insert(&again).unwrap().is_none());
        assert_eq!(storage.count().unwrap(), 1);

        let row = storage.find_rows(&RowFilter::default()).unwrap().remove(0);
        assert_eq!(row.weekdays.to_string(), "2,7");
    }

    #[test]
    fn test_same_flight_other_query_type_is_new_row() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert(&pr215_departure()).unwrap();
        let arrival = record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Arrival, &[2, 5, 7]);
        assert!(storage.insert(&arrival).unwrap().is_some());
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[test]
    fn test_insert_batch_is_idempotent() {
        let storage = Storage::open_in_memory().unwrap();
        let batch = vec![
            pr215_departure(),
            record("PR216", ("POM", "MNL"), ("09:20", "13:00"), QueryType::Departure, &[2]),
            record("PX10", ("POM", "BNE"), ("07:00", "10:00"), QueryType::Departure, &[1]),
        ];

        let first = storage.insert_batch(&batch).unwrap();
        assert_eq!(
            first,
            InsertReport {
                submitted: 3,
                inserted: 3,
                duplicates: 0
            }
        );

        let second = storage.insert_batch(&batch).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(storage.count().unwrap(), 3);
    }

    #[test]
    fn test_insert_batch_in_batch_duplicates() {
        let storage = Storage::open_in_memory().unwrap();
        let report = storage
            .insert_batch(&[pr215_departure(), pr215_departure()])
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_ingest_skips_malformed() {
        let storage = Storage::open_in_memory().unwrap();
        let mut raws: Vec<Value> = (0..10)
            .map(|i| raw_flight(&format!("{}", 200 + i), "mnl", "pom", ("00:10", "08:05"), "2"))
            .collect();
        raws[4]["flight"] = serde_json::json!({});

        let report = storage.ingest(&raws, QueryType::Departure, "mnl").unwrap();
        assert_eq!(report.retrieved, 10);
        assert_eq!(report.inserted, 9);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].index, 4);
        assert_eq!(storage.count().unwrap(), 9);
    }

    #[test]
    fn test_ingest_uppercases() {
        let storage = Storage::open_in_memory().unwrap();
        let raws = vec![raw_flight("215", "mnl", "pom", ("00:10", "08:05"), "2")];
        storage.ingest(&raws, QueryType::Departure, "mnl").unwrap();

        let row = storage.find_rows(&RowFilter::default()).unwrap().remove(0);
        assert_eq!(row.airport_code, "MNL");
        assert_eq!(row.dep_iata_code, "MNL");
        assert_eq!(row.arr_iata_code, "POM");
        assert_eq!(row.flight_iata_number, "PR215");
        assert_eq!(row.airline_name, "PHILIPPINE AIRLINES");
    }

    #[test]
    fn test_find_rows_filters() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .insert_batch(&[
                pr215_departure(),
                record("PR216", ("POM", "MNL"), ("09:20", "13:00"), QueryType::Departure, &[2]),
                record("PX10", ("POM", "BNE"), ("07:00", "10:00"), QueryType::Departure, &[1]),
            ])
            .unwrap();

        let filter = RowFilter {
            origin: Some("pom".to_string()),
            ..RowFilter::default()
        };
        let designators: Vec<String> = storage
            .find_rows(&filter)
            .unwrap()
            .iter()
            .map(|r| r.designator().to_string())
            .collect();
        assert_eq!(designators, vec!["PR216", "PX10"]);

        let filter = RowFilter {
            airline: Some("PR".to_string()),
            flight: Some("PR216".to_string()),
            ..RowFilter::default()
        };
        assert_eq!(storage.find_rows(&filter).unwrap().len(), 1);

        let filter = RowFilter {
            flight: Some("216".to_string()),
            ..RowFilter::default()
        };
        assert_eq!(storage.find_rows(&filter).unwrap().len(), 1);

        let filter = RowFilter {
            origin: Some("HKG".to_string()),
            ..RowFilter::default()
        };
        assert!(storage.find_rows(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_summary() {
        let storage = Storage::open_in_memory().unwrap();
        let empty = storage.summary(None, None).unwrap();
        assert_eq!(empty.total_flights, 0);
        assert!(empty.first_record.is_none());

        storage
            .insert_batch(&[
                pr215_departure(),
                record("PR215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Arrival, &[2, 5]),
                record("PX10", ("POM", "BNE"), ("07:00", "10:00"), QueryType::Departure, &[1]),
            ])
            .unwrap();

        let all = storage.summary(None, None).unwrap();
        assert_eq!(all.total_flights, 3);
        assert_eq!(all.airports, 2);
        assert_eq!(all.airlines, 2);
        assert!(all.first_record.is_some());
        assert!(all.first_record <= all.latest_record);

        let pom = storage.summary(Some("pom"), None).unwrap();
        assert_eq!(pom.total_flights, 2);

        let departures = storage.summary(None, Some(QueryType::Departure)).unwrap();
        assert_eq!(departures.total_flights, 2);
    }

    #[test]
    fn test_schema_guard_refuses_drifted_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&schema::CREATE_FLIGHTS_TABLE.replace("    query_type TEXT,\n", ""))
            .unwrap();

        let err = Storage::from_connection(conn, PathBuf::from(":memory:")).unwrap_err();
        assert!(err.is_schema_mismatch());
        assert!(err.to_string().contains("query_type"));
    }

    #[test]
    fn test_open_creates_file_and_table() {
        let dir = std::env::temp_dir().join(format!("flightsched_open_{}", std::process::id()));
        let path = dir.join("nested").join("flights.db");

        {
            let storage = Storage::open(&path).unwrap();
            storage.insert(&pr215_departure()).unwrap();
        }
        assert!(path.exists());

        let reopened = Storage::open_existing(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);

        drop(reopened);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_open_existing_missing_file() {
        let path = std::env::temp_dir().join(format!("flightsched_missing_{}.db", std::process::id()));
        let err = Storage::open_existing(&path).unwrap_err();
        assert!(matches!(err, Error::DatabaseMissing { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_legacy_rows_are_readable() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .conn
            .execute(
                "INSERT INTO flights (weekdays, airport_code, query_type, dep_iata_code, arr_iata_code,
                 flight_iata_number, dep_scheduled_time, arr_scheduled_time, created_at, updated_at)
                 VALUES ('1,3', 'MNL', NULL, 'MNL', 'POM', 'PR215', '00:10', '08:05',
                 '2025-09-01 10:00:00', '2025-09-01 10:00:00')",
                [],
            )
            .unwrap();

        let row = storage.find_rows(&RowFilter::default()).unwrap().remove(0);
        assert_eq!(row.query_type, None);
        assert_eq!(row.weekdays.to_string(), "1,3");
        assert_eq!(row.created_at.to_rfc3339(), "2025-09-01T10:00:00+00:00");
    }

    #[test]
    fn test_codeshare_columns_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        let mut marketing = record("PX5215", ("MNL", "POM"), ("00:10", "08:05"), QueryType::Departure, &[2]);
        marketing.codeshare = Some(OperatingFlight {
            airline_iata_code: "PR".to_string(),
            flight_iata_number: "PR215".to_string(),
        });
        let marketing_id = storage.insert(&marketing).unwrap().unwrap();
        let operating_id = storage.insert(&pr215_departure()).unwrap().unwrap();

        let row = storage.get(marketing_id).unwrap().unwrap();
        assert_eq!(row.codeshare, marketing.codeshare);
        assert_eq!(storage.get(operating_id).unwrap().unwrap().codeshare, None);

        let (flag, marketing_number, group): (i64, String, String) = storage
            .conn
            .query_row(
                "SELECT is_codeshare, marketing_flight_number, codeshare_group_id FROM flights WHERE id = ?1",
                [marketing_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(flag, 1);
        assert_eq!(marketing_number, "PX5215");
        assert_eq!(group, "PR215");

        let operating_group: String = storage
            .conn
            .query_row(
                "SELECT codeshare_group_id FROM flights WHERE id = ?1",
                [operating_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(operating_group, group);
    }

    #[test]
    fn test_table_without_codeshare_columns_accepts_inserts() {
        let conn = Connection::open_in_memory().unwrap();
        let legacy: String = schema::CREATE_FLIGHTS_TABLE
            .lines()
            .filter(|line| {
                !schema::CODESHARE_COLUMNS
                    .iter()
                    .any(|c| line.trim_start().starts_with(c))
            })
            .collect::<Vec<_>>()
            .join("\n")
            .replace("updated_at TEXT NOT NULL,", "updated_at TEXT NOT NULL");
        conn.execute_batch(&legacy).unwrap();
        let storage = Storage::from_connection(conn, PathBuf::from(":memory:")).unwrap();

        let mut marketing = pr215_departure();
        marketing.codeshare = Some(OperatingFlight {
            airline_iata_code: "PX".to_string(),
            flight_iata_number: "PX10".to_string(),
        });
        let id = storage.insert(&marketing).unwrap().unwrap();
        let row = storage.get(id).unwrap().unwrap();
        assert_eq!(row.designator(), "PR215");
        assert_eq!(row.codeshare, None);
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2025-09-01T10:00:00+00:00").is_some());
        assert!(parse_timestamp("2025-09-01 10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
