pub mod controller;
pub mod state;

pub use controller::{
    CaptureTicket, Clock, Collaborators, CoordinatorConfig, CoordinatorEvent, MutationSource,
    SessionCoordinator, SystemClock, UploadResult,
};
pub use state::{ActiveSession, BillRow, SessionSnapshot, SessionState};
