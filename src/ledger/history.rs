//! Browsing past bills: listing, filtering and totals.

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::Serialize;

use crate::error::PosError;
use crate::models::LedgerLine;

use super::naming::BillName;

/// Start/end filters match bills within this many minutes.
pub const TIME_TOLERANCE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

impl HistoryFilter {
    /// Parses staff input: date as `dd-mm-yyyy`, times as `HH:MM`. Blank means unset.
    pub fn parse(
        date: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> crate::error::Result<Self> {
        let date = match non_blank(date) {
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%d-%m-%Y").map_err(|_| {
                PosError::InvalidFilter(format!("date '{raw}' must be dd-mm-yyyy"))
            })?),
            None => None,
        };
        Ok(Self {
            date,
            start: parse_clock(start)?,
            end: parse_clock(end)?,
        })
    }

    pub fn matches(&self, name: &BillName) -> bool {
        if self.date.is_some_and(|date| date != name.date) {
            return false;
        }
        if self.start.is_some_and(|start| !within_tolerance(name.start, start)) {
            return false;
        }
        // An unfinished bill is compared on its start time.
        let end = name.end.unwrap_or(name.start);
        if self.end.is_some_and(|wanted| !within_tolerance(end, wanted)) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillSummary {
    pub path: PathBuf,
    pub table_id: u32,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
    pub date: NaiveDate,
    pub total: f64,
}

/// All `bill_*.csv` files in `dir`, most recently modified first.
pub fn list_bills(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut bills = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let is_bill = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("bill_") && name.ends_with(".csv"));
        if !is_bill {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        bills.push((modified, path));
    }

    bills.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(bills.into_iter().map(|(_, path)| path).collect())
}

pub fn read_lines(path: &Path) -> Result<Vec<LedgerLine>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open bill {}", path.display()))?;
    let mut lines = Vec::new();
    for row in reader.deserialize::<LedgerLine>() {
        lines.push(row.with_context(|| format!("invalid row in {}", path.display()))?);
    }
    Ok(lines)
}

/// Rows are cumulative snapshots, so the latest row per item is the one that counts.
pub fn latest_lines(lines: &[LedgerLine]) -> IndexMap<String, LedgerLine> {
    let mut latest = IndexMap::new();
    for line in lines {
        latest.insert(line.item.clone(), line.clone());
    }
    latest
}

pub fn bill_total(path: &Path) -> Result<f64> {
    let lines = read_lines(path)?;
    Ok(latest_lines(&lines)
        .values()
        .map(|line| line.total_line)
        .sum())
}

pub fn summaries(dir: &Path, filter: &HistoryFilter) -> Result<Vec<BillSummary>> {
    let mut out = Vec::new();
    for path in list_bills(dir)? {
        let Some(name) = BillName::parse(&path) else {
            debug!("skipping unrecognised bill file {}", path.display());
            continue;
        };
        if !filter.matches(&name) {
            continue;
        }
        let total = match bill_total(&path) {
            Ok(total) => total,
            Err(err) => {
                warn!("skipping unreadable bill {}: {err:#}", path.display());
                continue;
            }
        };
        out.push(BillSummary {
            path,
            table_id: name.table_id,
            start: name.start,
            end: name.end,
            date: name.date,
            total,
        });
    }
    Ok(out)
}

/// Bills that were never sealed, typically left behind by a crash.
pub fn open_bills(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_bills(dir)?
        .into_iter()
        .filter(|path| BillName::parse(path).is_some_and(|name| name.is_open()))
        .collect())
}

fn within_tolerance(a: NaiveTime, b: NaiveTime) -> bool {
    a.signed_duration_since(b).num_minutes().abs() <= TIME_TOLERANCE_MINUTES
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|raw| !raw.is_empty())
}

fn parse_clock(value: Option<&str>) -> crate::error::Result<Option<NaiveTime>> {
    match non_blank(value) {
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
            .map(Some)
            .map_err(|_| PosError::InvalidFilter(format!("time '{raw}' must be HH:MM"))),
        None => Ok(None),
    }
}
