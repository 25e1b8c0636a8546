use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Error, Debug, PartialEq)]
pub enum DateError {
    #[error("Not a valid date: '{0}'")]
    InvalidFormat(String),
    #[error("start date {start} is after end date {end}")]
    ReversedRange { start: NaiveDate, end: NaiveDate },
    #[error("no YYYYMMDD date found in file name '{0}'")]
    NoEmbeddedDate(String),
}

/// parses a strict `YYYYMMDD` string, "20161213" -> 2016-12-13
pub fn parse_date(s: &str) -> Result<NaiveDate, DateError> {
    // chrono's %Y accepts signs and variable widths, so check the shape first
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DateError::InvalidFormat(s.to_string()));
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| DateError::InvalidFormat(s.to_string()))
}

/// Inclusive date range, `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateError> {
        if start > end {
            return Err(DateError::ReversedRange { start, end });
        }
        Ok(DateRange { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

fn embedded_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[0-9]{8}").expect("static regex is valid"))
}

/// Extracts the date embedded in a log file name.
///
/// Only the base name is searched. The first run of eight digits wins, so
/// "worker3-20161213.log" yields 2016-12-13.
pub fn parse_dt_from_logfile_name(key: &str) -> Result<NaiveDate, DateError> {
    let base = key.rsplit('/').next().unwrap_or(key);
    let found = embedded_date_regex()
        .find(base)
        .ok_or_else(|| DateError::NoEmbeddedDate(key.to_string()))?;

    NaiveDate::parse_from_str(found.as_str(), DATE_FORMAT)
        .map_err(|_| DateError::NoEmbeddedDate(key.to_string()))
}
