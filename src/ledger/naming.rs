//! Bill file names: `bill_<table>_<HH-MM>[_<HH-MM>]_<dd-mm-yyyy>.csv`.
//!
//! History browsing recovers table, start, end and date from the name alone,
//! so this format is load-bearing.

use std::{fmt, path::Path};

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

const TIME_FORMAT: &str = "%H-%M";
const DATE_FORMAT: &str = "%d-%m-%Y";

lazy_static! {
    static ref BILL_RE: Regex = Regex::new(
        r"^bill_(\d+)_(\d{1,2}-\d{2})_(?:(\d{1,2}-\d{2})_)?(\d{1,2}-\d{1,2}-\d{4})$"
    )
    .expect("bill name pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillName {
    pub table_id: u32,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
    pub date: NaiveDate,
}

impl BillName {
    pub fn open(table_id: u32, start: NaiveTime, date: NaiveDate) -> Self {
        Self {
            table_id,
            start,
            end: None,
            date,
        }
    }

    pub fn closed(self, end: NaiveTime) -> Self {
        Self {
            end: Some(end),
            ..self
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn file_name(&self) -> String {
        format!("{self}.csv")
    }

    /// Parses a file name or path; only the stem is inspected.
    pub fn parse(path: impl AsRef<Path>) -> Option<Self> {
        let stem = path.as_ref().file_stem()?.to_str()?;
        let caps = BILL_RE.captures(stem)?;

        let table_id = caps.get(1)?.as_str().parse().ok()?;
        let start = NaiveTime::parse_from_str(caps.get(2)?.as_str(), TIME_FORMAT).ok()?;
        let end = match caps.get(3) {
            Some(raw) => Some(NaiveTime::parse_from_str(raw.as_str(), TIME_FORMAT).ok()?),
            None => None,
        };
        let date = NaiveDate::parse_from_str(caps.get(4)?.as_str(), DATE_FORMAT).ok()?;

        Some(Self {
            table_id,
            start,
            end,
            date,
        })
    }
}

impl fmt::Display for BillName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bill_{}_{}", self.table_id, self.start.format(TIME_FORMAT))?;
        if let Some(end) = self.end {
            write!(f, "_{}", end.format(TIME_FORMAT))?;
        }
        write!(f, "_{}", self.date.format(DATE_FORMAT))
    }
}
