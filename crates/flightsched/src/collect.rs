//! Collection runs: fetch schedules for a plan of queries and ingest them.
//!
//! A run walks every (date, airport, query type) combination of a
//! [`CollectionPlan`], pacing and retrying calls. Failed calls and malformed
//! records are counted and the run moves on; only storage errors stop it.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::{fetch_with_retry, Pacer, RetryPolicy, ScheduleSource};
use crate::config::{is_airport_code, CollectConfig};
use crate::error::{Error, Result};
use crate::flight::QueryType;
use crate::presets::Presets;
use crate::storage::Storage;

/// How far ahead the future-schedules endpoint starts serving data.
pub const MIN_LEAD_DAYS: i64 = 8;

/// Values given on the command line; they take precedence over presets and
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOverrides {
    /// Anchor airports.
    pub airports: Vec<String>,
    /// Query perspectives.
    pub query_types: Option<Vec<QueryType>>,
    /// First date.
    pub date: Option<NaiveDate>,
    /// Number of consecutive dates.
    pub days: Option<u32>,
}

/// The queries a collection run will make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionPlan {
    /// Anchor airports, uppercased.
    pub airports: Vec<String>,
    /// Query perspectives.
    pub query_types: Vec<QueryType>,
    /// Dates to query, ascending.
    pub dates: Vec<NaiveDate>,
}

impl CollectionPlan {
    /// Build a plan, validating the airport codes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no airports or query types are
    /// given, `days` is zero, or a code is not a three-letter IATA code.
    pub fn new(airports: &[String], query_types: &[QueryType], first_date: NaiveDate, days: u32) -> Result<Self> {
        if airports.is_empty() {
            return Err(Error::invalid_argument(
                "no airports to collect (use --airport, --presets or collect.airports)",
            ));
        }
        if query_types.is_empty() {
            return Err(Error::invalid_argument("no query types to collect"));
        }
        if days == 0 {
            return Err(Error::invalid_argument("days must be greater than 0"));
        }

        let mut codes: Vec<String> = Vec::with_capacity(airports.len());
        for airport in airports {
            if !is_airport_code(airport) {
                return Err(Error::invalid_argument(format!("invalid airport code {airport:?}")));
            }
            let code = airport.trim().to_uppercase();
            if !codes.contains(&code) {
                codes.push(code);
            }
        }

        let mut types: Vec<QueryType> = Vec::with_capacity(query_types.len());
        for query_type in query_types {
            if !types.contains(query_type) {
                types.push(*query_type);
            }
        }

        Ok(Self {
            airports: codes,
            query_types: types,
            dates: (0..days)
                .map(|offset| first_date + Duration::days(i64::from(offset)))
                .collect(),
        })
    }

    /// Resolve a plan from command-line overrides, an optional presets file
    /// and the configured defaults, in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`CollectionPlan::new`].
    pub fn resolve(
        config: &CollectConfig,
        presets: Option<&Presets>,
        overrides: &PlanOverrides,
        today: NaiveDate,
    ) -> Result<Self> {
        let airports = if !overrides.airports.is_empty() {
            overrides.airports.clone()
        } else if let Some(presets) = presets {
            presets.airports.clone()
        } else {
            config.airports.clone()
        };

        let query_types = overrides
            .query_types
            .clone()
            .or_else(|| presets.and_then(|p| p.query_types.clone()))
            .unwrap_or_else(|| config.query_types.clone());

        let first_date = overrides
            .date
            .or_else(|| presets.and_then(|p| p.date))
            .unwrap_or_else(|| {
                let offset = presets
                    .and_then(|p| p.date_offset_days)
                    .unwrap_or(config.date_offset_days);
                today + Duration::days(i64::from(offset))
            });

        let days = overrides
            .days
            .or_else(|| presets.and_then(|p| p.days))
            .unwrap_or(config.days);

        Self::new(&airports, &query_types, first_date, days)
    }

    /// Number of API calls the plan makes.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.airports.len() * self.query_types.len() * self.dates.len()
    }

    /// Dates earlier than the endpoint serves, relative to `today`.
    #[must_use]
    pub fn dates_too_soon(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let earliest = today + Duration::days(MIN_LEAD_DAYS);
        self.dates.iter().copied().filter(|d| *d < earliest).collect()
    }
}

/// A call that failed after retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFailure {
    /// Anchor airport.
    pub airport_code: String,
    /// Query perspective.
    pub query_type: QueryType,
    /// Queried date.
    pub date: NaiveDate,
    /// Final error message.
    pub error: String,
}

/// Totals for a collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    /// API calls made.
    pub calls_attempted: usize,
    /// API calls that failed after retries.
    pub calls_failed: usize,
    /// Raw objects received.
    pub retrieved: usize,
    /// Rows newly written.
    pub inserted: usize,
    /// Valid records already stored.
    pub duplicates: usize,
    /// Records rejected by normalization.
    pub malformed: usize,
    /// Details of the failed calls.
    pub failures: Vec<CallFailure>,
}

/// Run a collection plan.
///
/// # Errors
///
/// Returns an error only if storage fails; API failures are recorded in the
/// report.
pub async fn collect(
    source: &dyn ScheduleSource,
    storage: &Storage,
    plan: &CollectionPlan,
    pacer: &mut Pacer,
    retry: &RetryPolicy,
    today: NaiveDate,
) -> Result<CollectionReport> {
    let too_soon = plan.dates_too_soon(today);
    if !too_soon.is_empty() {
        warn!(
            "{} date(s) are less than {} days ahead and may return no schedules (first: {})",
            too_soon.len(),
            MIN_LEAD_DAYS,
            too_soon[0]
        );
    }

    info!(
        "Collecting {} airport(s) x {} type(s) x {} date(s) = {} calls, {}ms apart",
        plan.airports.len(),
        plan.query_types.len(),
        plan.dates.len(),
        plan.calls(),
        pacer.spacing().as_millis()
    );

    let mut report = CollectionReport::default();
    for date in &plan.dates {
        for airport in &plan.airports {
            for query_type in &plan.query_types {
                pacer.wait().await;
                report.calls_attempted += 1;

                let raws = match fetch_with_retry(source, airport, *query_type, *date, retry).await {
                    Ok(raws) => raws,
                    Err(e) => {
                        error!("{} {} {} failed: {}", airport, query_type, date, e);
                        report.calls_failed += 1;
                        report.failures.push(CallFailure {
                            airport_code: airport.clone(),
                            query_type: *query_type,
                            date: *date,
                            error: e.to_string(),
                        });
                        continue;
                    }
                };

                let ingested = storage.ingest(&raws, *query_type, airport)?;
                info!(
                    "{} {} {}: {} retrieved, {} new, {} duplicate, {} malformed",
                    airport,
                    query_type,
                    date,
                    ingested.retrieved,
                    ingested.inserted,
                    ingested.duplicates,
                    ingested.malformed.len()
                );
                report.retrieved += ingested.retrieved;
                report.inserted += ingested.inserted;
                report.duplicates += ingested.duplicates;
                report.malformed += ingested.malformed.len();
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::client::fakes::ScriptedSource;
    use crate::normalize::fixtures::raw_flight;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            backoff_base: StdDuration::ZERO,
        }
    }

    #[test]
    fn test_plan_new() {
        let plan = CollectionPlan::new(
            &["mnl".to_string(), "POM".to_string(), "MNL".to_string()],
            &QueryType::ALL,
            day(2025, 10, 1),
            3,
        )
        .unwrap();

        assert_eq!(plan.airports, vec!["MNL", "POM"]);
        assert_eq!(plan.dates, vec![day(2025, 10, 1), day(2025, 10, 2), day(2025, 10, 3)]);
        assert_eq!(plan.calls(), 12);
    }

    #[test]
    fn test_plan_drops_repeated_query_types() {
        let plan = CollectionPlan::new(
            &["MNL".to_string()],
            &[QueryType::Departure, QueryType::Arrival, QueryType::Departure],
            day(2025, 10, 1),
            1,
        )
        .unwrap();

        assert_eq!(plan.query_types, vec![QueryType::Departure, QueryType::Arrival]);
        assert_eq!(plan.calls(), 2);
    }

    #[test]
    fn test_plan_rejects_bad_input() {
        assert!(CollectionPlan::new(&[], &QueryType::ALL, day(2025, 10, 1), 1).is_err());
        assert!(CollectionPlan::new(&["MNL".to_string()], &[], day(2025, 10, 1), 1).is_err());
        assert!(CollectionPlan::new(&["MNL".to_string()], &QueryType::ALL, day(2025, 10, 1), 0).is_err());
        assert!(CollectionPlan::new(&["RPLL".to_string()], &QueryType::ALL, day(2025, 10, 1), 1).is_err());
    }

    #[test]
    fn test_resolve_defaults_from_config() {
        let config = CollectConfig {
            airports: vec!["MNL".to_string()],
            ..CollectConfig::default()
        };
        let plan = CollectionPlan::resolve(&config, None, &PlanOverrides::default(), day(2025, 9, 1)).unwrap();

        assert_eq!(plan.airports, vec!["MNL"]);
        assert_eq!(plan.query_types, QueryType::ALL.to_vec());
        assert_eq!(plan.dates.len(), 7);
        assert_eq!(plan.dates[0], day(2025, 9, 9));
    }

    #[test]
    fn test_resolve_precedence() {
        let config = CollectConfig {
            airports: vec!["HND".to_string()],
            ..CollectConfig::default()
        };
        let presets = Presets {
            airports: vec!["MNL".to_string(), "POM".to_string()],
            date_offset_days: Some(10),
            days: Some(2),
            ..Presets::default()
        };

        let plan = CollectionPlan::resolve(&config, Some(&presets), &PlanOverrides::default(), day(2025, 9, 1)).unwrap();
        assert_eq!(plan.airports, vec!["MNL", "POM"]);
        assert_eq!(plan.dates, vec![day(2025, 9, 11), day(2025, 9, 12)]);

        let overrides = PlanOverrides {
            airports: vec!["CNS".to_string()],
            query_types: Some(vec![QueryType::Arrival]),
            date: Some(day(2025, 12, 1)),
            days: Some(1),
        };
        let plan = CollectionPlan::resolve(&config, Some(&presets), &overrides, day(2025, 9, 1)).unwrap();
        assert_eq!(plan.airports, vec!["CNS"]);
        assert_eq!(plan.query_types, vec![QueryType::Arrival]);
        assert_eq!(plan.dates, vec![day(2025, 12, 1)]);
    }

    #[test]
    fn test_dates_too_soon() {
        let plan = CollectionPlan::new(&["MNL".to_string()], &QueryType::ALL, day(2025, 9, 7), 3).unwrap();
        assert_eq!(plan.dates_too_soon(day(2025, 9, 1)), vec![day(2025, 9, 7), day(2025, 9, 8)]);
        assert!(plan.dates_too_soon(day(2025, 8, 1)).is_empty());
    }

    #[tokio::test]
    async fn test_collect_ingests_and_counts() {
        let storage = Storage::open_in_memory().unwrap();
        let source = ScriptedSource::new(vec![], || {
            Ok(vec![
                raw_flight("215", "MNL", "POM", ("00:10", "08:05"), "2"),
                raw_flight("216", "POM", "MNL", ("09:20", "13:00"), "2"),
                serde_json::json!({"weekday": "2"}),
            ])
        });
        let plan = CollectionPlan::new(&["MNL".to_string()], &[QueryType::Departure], day(2025, 10, 1), 2).unwrap();
        let mut pacer = Pacer::new(StdDuration::ZERO);

        let report = collect(&source, &storage, &plan, &mut pacer, &no_backoff(), day(2025, 9, 1))
            .await
            .unwrap();

        assert_eq!(report.calls_attempted, 2);
        assert_eq!(report.calls_failed, 0);
        assert_eq!(report.retrieved, 6);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.malformed, 2);
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_collect_continues_after_failed_call() {
        let storage = Storage::open_in_memory().unwrap();
        let source = ScriptedSource::new(
            vec![
                Err(Error::transport("reset")),
                Err(Error::transport("reset")),
            ],
            || Ok(vec![raw_flight("215", "MNL", "POM", ("00:10", "08:05"), "2")]),
        );
        let plan = CollectionPlan::new(&["MNL".to_string(), "POM".to_string()], &[QueryType::Departure], day(2025, 10, 1), 1)
            .unwrap();
        let mut pacer = Pacer::new(StdDuration::ZERO);

        let report = collect(&source, &storage, &plan, &mut pacer, &no_backoff(), day(2025, 9, 1))
            .await
            .unwrap();

        assert_eq!(report.calls_attempted, 2);
        assert_eq!(report.calls_failed, 1);
        assert_eq!(report.failures[0].airport_code, "MNL");
        assert_eq!(report.inserted, 1);
        assert_eq!(source.calls(), 3);
    }
}
