pub mod controller;
pub mod gpio;
pub mod loop_worker;

pub use controller::SensingController;
pub use gpio::{SensorInput, SysfsGpio};
