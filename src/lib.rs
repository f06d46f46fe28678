pub mod app;
pub mod capture;
pub mod classifier;
pub mod cli;
pub mod console;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod menu;
pub mod models;
pub mod sensing;
pub mod settings;
pub mod utils;

pub use app::BeerPos;
pub use coordinator::{CoordinatorEvent, SessionCoordinator, SessionSnapshot};
pub use error::{PosError, Result};
