use chrono::{Datelike, Months, NaiveDate};

use crate::dates::DateRange;

pub const MONTH_PREFIX_FORMAT: &str = "%Y%m";

/// return the month prefixes to be listed, from the month of the range start
/// up to and including the month of the range end
pub fn gen_month_prefixes(range: &DateRange) -> Vec<String> {
    let mut prefixes = Vec::new();

    // compare on month starts so the end month is emitted whatever its day
    let mut month = first_of_month(range.start());
    let last = first_of_month(range.end());

    while month <= last {
        prefixes.push(month.format(MONTH_PREFIX_FORMAT).to_string());
        month = match month.checked_add_months(Months::new(1)) {
            Some(next) => next,
            None => break,
        };
    }

    prefixes
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// strips any path prefix from a key, "201612/worker3-20161213.log" -> "worker3-20161213.log"
pub fn local_file_name(key: &str) -> Option<&str> {
    match key.rsplit('/').next() {
        Some("") | None => None,
        Some(name) => Some(name),
    }
}
