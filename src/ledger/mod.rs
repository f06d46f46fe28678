//! Append-only bill ledger, one CSV file per table session.

pub mod history;
pub mod naming;
pub mod transfer;

use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write},
    path::PathBuf,
};

use anyhow::{anyhow, Context};
use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::error::{PosError, Result};
use crate::models::LedgerLine;

pub use naming::BillName;

pub const BILL_HEADER: [&str; 4] = ["item", "qty", "unit_price", "total_line"];

/// An open bill as tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillHandle {
    pub path: PathBuf,
    pub name: BillName,
}

pub trait BillLedger: Send + Sync {
    fn create_session(&self, table_id: u32, started_at: NaiveDateTime) -> Result<BillHandle>;

    /// Must be durable before returning `Ok`; on error nothing of the line
    /// may remain in the bill.
    fn append_line(&self, bill: &BillHandle, line: &LedgerLine) -> Result<()>;

    /// Seals the bill under its final name and returns that path.
    fn close_session(&self, bill: &BillHandle, ended_at: NaiveDateTime) -> Result<PathBuf>;

    fn compute_total(&self, bill: &BillHandle) -> Result<f64>;
}

pub struct CsvLedger {
    bills_dir: PathBuf,
}

impl CsvLedger {
    pub fn new(bills_dir: impl Into<PathBuf>) -> Self {
        Self {
            bills_dir: bills_dir.into(),
        }
    }

    /// Any bill, open or sealed, sharing `name`'s table, date and start minute.
    fn bill_started_as(&self, name: &BillName) -> Result<Option<PathBuf>> {
        let wanted = name.file_name();
        let entries = fs::read_dir(&self.bills_dir)
            .with_context(|| format!("failed to list {}", self.bills_dir.display()))
            .map_err(PosError::LedgerWrite)?;
        for entry in entries {
            let path = entry?.path();
            let Some(existing) = BillName::parse(&path) else {
                continue;
            };
            let as_opened = BillName {
                end: None,
                ..existing
            };
            if as_opened.file_name() == wanted {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

impl BillLedger for CsvLedger {
    fn create_session(&self, table_id: u32, started_at: NaiveDateTime) -> Result<BillHandle> {
        fs::create_dir_all(&self.bills_dir)
            .with_context(|| {
                format!("failed to create bills directory {}", self.bills_dir.display())
            })
            .map_err(PosError::LedgerWrite)?;

        let name = BillName::open(table_id, started_at.time(), started_at.date());
        let path = self.bills_dir.join(name.file_name());

        // A sealed bill from the same start minute would collide when this one is sealed.
        if let Some(existing) = self.bill_started_as(&name)? {
            return Err(PosError::BillExists(existing));
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(PosError::BillExists(path));
            }
            Err(err) => {
                return Err(PosError::LedgerWrite(
                    anyhow::Error::new(err).context(format!("failed to create {}", path.display())),
                ));
            }
        };

        let header = encode_record(&BILL_HEADER.map(String::from))
            .and_then(|bytes| {
                file.write_all(&bytes)?;
                file.sync_data()?;
                Ok(())
            })
            .with_context(|| format!("failed to write header of {}", path.display()));
        if let Err(err) = header {
            let _ = fs::remove_file(&path);
            return Err(PosError::LedgerWrite(err));
        }

        info!("Opened bill {}", path.display());
        Ok(BillHandle { path, name })
    }

    fn append_line(&self, bill: &BillHandle, line: &LedgerLine) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&bill.path)
            .with_context(|| format!("failed to open bill {}", bill.path.display()))
            .map_err(PosError::LedgerWrite)?;

        let bytes = encode_record(&line.to_record()).map_err(PosError::LedgerWrite)?;
        append_or_truncate(&mut file, &bytes, write_synced)
            .with_context(|| format!("failed to append to {}", bill.path.display()))
            .map_err(PosError::LedgerWrite)?;

        debug!(
            "bill {}: {} qty={} total_line={}",
            bill.name, line.item, line.qty, line.total_line
        );
        Ok(())
    }

    fn close_session(&self, bill: &BillHandle, ended_at: NaiveDateTime) -> Result<PathBuf> {
        let closed = bill.name.closed(ended_at.time());
        let target = bill.path.with_file_name(closed.file_name());

        if target.exists() {
            return Err(PosError::BillExists(target));
        }

        fs::rename(&bill.path, &target)
            .with_context(|| {
                format!(
                    "failed to seal bill {} as {}",
                    bill.path.display(),
                    target.display()
                )
            })
            .map_err(PosError::LedgerWrite)?;

        info!("Sealed bill {}", target.display());
        Ok(target)
    }

    fn compute_total(&self, bill: &BillHandle) -> Result<f64> {
        history::bill_total(&bill.path).map_err(PosError::LedgerWrite)
    }
}

fn write_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_data()
}

/// Runs `write`; on failure the file is cut back to its prior length so it
/// never holds a torn row.
fn append_or_truncate<W>(file: &mut File, bytes: &[u8], write: W) -> anyhow::Result<()>
where
    W: FnOnce(&mut File, &[u8]) -> io::Result<()>,
{
    let previous_len = file.metadata().context("failed to stat bill")?.len();
    if let Err(err) = write(file, bytes) {
        if let Err(truncate_err) = file.set_len(previous_len) {
            warn!("failed to roll back partial row: {truncate_err}");
        }
        return Err(err.into());
    }
    Ok(())
}

fn encode_record(fields: &[String; 4]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to encode bill row: {err}"))
}
