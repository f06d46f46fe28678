//! Error taxonomy surfaced by the coordinator and the admin/history tools.
//!
//! Backends (capture, classifier, settings I/O) work with `anyhow` and are
//! folded into these variants at the coordinator boundary.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PosError {
    #[error("menu is empty, add items before starting a table")]
    EmptyMenu,

    #[error("a table session is already active")]
    SessionAlreadyActive,

    #[error("no active table session")]
    NoActiveSession,

    #[error("item '{0}' is not on this session's menu")]
    UnknownItem(String),

    #[error("image was not recognised as a menu item")]
    UnrecognizedImage,

    #[error("cannot read image {path}: {reason}")]
    ImageRead { path: PathBuf, reason: String },

    #[error("classifier failed: {0}")]
    Classifier(String),

    #[error("failed to write bill ledger: {0:#}")]
    LedgerWrite(#[source] anyhow::Error),

    #[error("bill already exists: {}", .0.display())]
    BillExists(PathBuf),

    #[error("menu error: {0}")]
    Menu(String),

    #[error("invalid history filter: {0}")]
    InvalidFilter(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PosError {
    /// Errors that leave the session untouched and can simply be shown to staff.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PosError::LedgerWrite(_) | PosError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, PosError>;
