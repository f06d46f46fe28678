use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;

use crate::ledger::BillHandle;
use crate::models::{Menu, SessionInfo, SessionStatus};

/// The one open table. Quantity keys are exactly the menu snapshot's names.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: String,
    pub table_id: u32,
    pub started_at: NaiveDateTime,
    pub menu: Menu,
    pub quantities: IndexMap<String, u32>,
    pub bill: BillHandle,
}

impl ActiveSession {
    pub fn new(
        id: String,
        table_id: u32,
        started_at: NaiveDateTime,
        menu: Menu,
        bill: BillHandle,
    ) -> Self {
        let quantities = menu.names().map(|name| (name.to_string(), 0)).collect();
        Self {
            id,
            table_id,
            started_at,
            menu,
            quantities,
            bill,
        }
    }

    pub fn quantity(&self, item: &str) -> Option<u32> {
        self.quantities.get(item).copied()
    }

    pub fn total(&self) -> f64 {
        self.quantities
            .iter()
            .map(|(name, qty)| f64::from(*qty) * self.menu.price(name).unwrap_or(0.0))
            .sum()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            table_id: self.table_id,
            started_at: self.started_at,
            ended_at: None,
            status: SessionStatus::Active,
            bill_path: self.bill.path.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Inactive,
    Active(ActiveSession),
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Inactive => SessionStatus::Inactive,
            SessionState::Active(_) => SessionStatus::Active,
        }
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        match self {
            SessionState::Active(session) => Some(session),
            SessionState::Inactive => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveSession> {
        match self {
            SessionState::Active(session) => Some(session),
            SessionState::Inactive => None,
        }
    }

    /// The active session only if it is the one identified by `session_id`.
    pub fn active_with_id(&mut self, session_id: &str) -> Option<&mut ActiveSession> {
        self.active_mut().filter(|session| session.id == session_id)
    }

    pub fn take(&mut self) -> Option<ActiveSession> {
        match std::mem::take(self) {
            SessionState::Active(session) => Some(session),
            SessionState::Inactive => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRow {
    pub item: String,
    pub unit_price: f64,
    pub quantity: u32,
}

/// Read-only view handed to the presentation surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session: Option<SessionInfo>,
    pub rows: Vec<BillRow>,
    pub total: f64,
    pub capture_in_flight: bool,
}

impl SessionSnapshot {
    pub fn from_state(state: &SessionState, capture_in_flight: bool) -> Self {
        match state.active() {
            Some(session) => Self {
                status: SessionStatus::Active,
                session: Some(session.info()),
                rows: session
                    .menu
                    .iter()
                    .map(|(item, unit_price)| BillRow {
                        item: item.to_string(),
                        unit_price,
                        quantity: session.quantity(item).unwrap_or(0),
                    })
                    .collect(),
                total: session.total(),
                capture_in_flight,
            },
            None => Self {
                status: SessionStatus::Inactive,
                session: None,
                rows: Vec::new(),
                total: 0.0,
                capture_in_flight,
            },
        }
    }
}
