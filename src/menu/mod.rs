//! Menu source backed by `menu.csv`.
//!
//! The coordinator only reads a snapshot through [`MenuSource`]; the admin
//! operations rewrite the whole file, renumbering the `id` column.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::error::PosError;
use crate::models::{format_amount, Menu, MenuEntry};

pub trait MenuSource: Send + Sync {
    fn current_menu(&self) -> Result<Menu>;
}

#[derive(Debug, Deserialize)]
struct MenuRow {
    name: String,
    price: f64,
}

pub struct CsvMenuStore {
    path: PathBuf,
    // Serialises read-modify-write cycles of the admin operations.
    write_lock: Mutex<()>,
}

impl CsvMenuStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Menu rows in file order. A missing file reads as an empty menu.
    pub fn entries(&self) -> Result<Vec<MenuEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open menu {}", self.path.display()))?;

        let mut entries = Vec::new();
        for (index, row) in reader.deserialize::<MenuRow>().enumerate() {
            let row = row.with_context(|| {
                format!("invalid menu row {} in {}", index + 1, self.path.display())
            })?;
            let name = row.name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            if !row.price.is_finite() || row.price < 0.0 {
                anyhow::bail!("menu item '{name}' has invalid price {}", row.price);
            }
            entries.push(MenuEntry {
                name,
                price: row.price,
            });
        }
        Ok(entries)
    }

    pub fn add_item(&self, name: &str, price: f64) -> crate::error::Result<()> {
        let name = validate(name, price)?;
        self.modify(|entries| {
            if entries.iter().any(|entry| entry.name == name) {
                return Err(PosError::Menu(format!("'{name}' is already on the menu")));
            }
            entries.push(MenuEntry {
                name: name.clone(),
                price,
            });
            Ok(())
        })
    }

    pub fn set_price(&self, name: &str, price: f64) -> crate::error::Result<()> {
        let name = validate(name, price)?;
        self.modify(|entries| {
            let entry = entries
                .iter_mut()
                .find(|entry| entry.name == name)
                .ok_or_else(|| PosError::UnknownItem(name.clone()))?;
            entry.price = price;
            Ok(())
        })
    }

    pub fn remove_item(&self, name: &str) -> crate::error::Result<()> {
        self.modify(|entries| {
            let before = entries.len();
            entries.retain(|entry| entry.name != name);
            if entries.len() == before {
                return Err(PosError::UnknownItem(name.to_string()));
            }
            Ok(())
        })
    }

    fn modify<F>(&self, change: F) -> crate::error::Result<()>
    where
        F: FnOnce(&mut Vec<MenuEntry>) -> crate::error::Result<()>,
    {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut entries = self
            .entries()
            .map_err(|err| PosError::Menu(format!("{err:#}")))?;
        change(&mut entries)?;
        self.save(&entries)
            .map_err(|err| PosError::Menu(format!("{err:#}")))?;
        info!("Menu saved with {} items", entries.len());
        Ok(())
    }

    fn save(&self, entries: &[MenuEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create menu directory {}", parent.display())
                })?;
            }
        }

        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("failed to write menu {}", self.path.display()))?;
        writer.write_record(["id", "name", "price"])?;
        for (index, entry) in entries.iter().enumerate() {
            writer.write_record([
                (index + 1).to_string(),
                entry.name.clone(),
                format_amount(entry.price),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl MenuSource for CsvMenuStore {
    fn current_menu(&self) -> Result<Menu> {
        Ok(self.entries()?.into_iter().collect())
    }
}

fn validate(name: &str, price: f64) -> crate::error::Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::Menu("item name must not be empty".into()));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(PosError::Menu(format!("price for '{name}' must be non-negative")));
    }
    Ok(name.to_string())
}
