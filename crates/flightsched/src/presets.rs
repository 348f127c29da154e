//! Query presets files.
//!
//! A presets file pins the airports and dates of a collection run:
//!
//! ```text
//! # comments
//! iataCode=MNL,POM
//! date=2025-10-01
//! dateOffset=8
//! days=7
//! type=departure,arrival
//! ```
//!
//! Only `iataCode` is required. The first occurrence of a key wins. An
//! explicit `date` takes precedence over `dateOffset`.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::is_airport_code;
use crate::error::{Error, Result};
use crate::flight::QueryType;

/// Parsed contents of a presets file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presets {
    /// Anchor airports, uppercased.
    pub airports: Vec<String>,
    /// Fixed first date.
    pub date: Option<NaiveDate>,
    /// First date in days from today (ignored when `date` is set).
    pub date_offset_days: Option<u32>,
    /// Number of consecutive dates.
    pub days: Option<u32>,
    /// Query perspectives.
    pub query_types: Option<Vec<QueryType>>,
}

impl Presets {
    /// Read and parse a presets file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or [`Error::Presets`]
    /// if its contents are invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    /// Parse presets text; `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Presets`] on an invalid value or when no airports are
    /// given.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let fail = |line_no: usize, message: String| Error::Presets {
            path: PathBuf::from(path),
            message: format!("line {line_no}: {message}"),
        };

        let mut presets = Self::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(fail(line_no, format!("expected key=value, got {line:?}")));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "iataCode" => {
                    if !presets.airports.is_empty() {
                        warn!("{}:{}: ignoring repeated iataCode", path.display(), line_no);
                        continue;
                    }
                    for code in value.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                        if !is_airport_code(code) {
                            return Err(fail(line_no, format!("invalid airport code {code:?}")));
                        }
                        presets.airports.push(code.to_uppercase());
                    }
                }
                "date" if presets.date.is_none() => {
                    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                        .map_err(|e| fail(line_no, format!("invalid date {value:?}: {e}")))?;
                    presets.date = Some(date);
                }
                "dateOffset" if presets.date_offset_days.is_none() => {
                    let offset = value
                        .parse()
                        .map_err(|_| fail(line_no, format!("invalid dateOffset {value:?}")))?;
                    presets.date_offset_days = Some(offset);
                }
                "days" if presets.days.is_none() => {
                    let days: u32 = value
                        .parse()
                        .map_err(|_| fail(line_no, format!("invalid days {value:?}")))?;
                    if days == 0 {
                        return Err(fail(line_no, "days must be greater than 0".to_string()));
                    }
                    presets.days = Some(days);
                }
                "type" if presets.query_types.is_none() => {
                    let types = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::parse::<QueryType>)
                        .collect::<Result<Vec<QueryType>>>()
                        .map_err(|e| fail(line_no, e.to_string()))?;
                    presets.query_types = Some(types);
                }
                "date" | "dateOffset" | "days" | "type" => {
                    warn!("{}:{}: ignoring repeated {}", path.display(), line_no, key);
                }
                other => {
                    warn!("{}:{}: unknown key {:?}", path.display(), line_no, other);
                }
            }
        }

        if presets.airports.is_empty() {
            return Err(Error::Presets {
                path: PathBuf::from(path),
                message: "no iataCode line with at least one airport".to_string(),
            });
        }
        if presets.date.is_some() && presets.date_offset_days.is_some() {
            warn!("{}: date overrides dateOffset", path.display());
        }

        debug!("Loaded presets from {}: {:?}", path.display(), presets);
        Ok(presets)
    }
}
