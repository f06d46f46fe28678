pub mod bill;
pub mod capture;
pub mod menu;
pub mod session;

pub use bill::{format_amount, LedgerLine};
pub use capture::{CaptureAttempt, CaptureOutcome, SkipReason};
pub use menu::{Menu, MenuEntry};
pub use session::{ClosedSession, Direction, SessionInfo, SessionStatus};
