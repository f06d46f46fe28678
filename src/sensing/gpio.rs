//! Presence sensor input.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use log::info;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

pub trait SensorInput: Send + Sync {
    /// True while an object sits in front of the sensor.
    fn is_triggered(&self) -> Result<bool>;
}

/// Digital input through the sysfs GPIO interface.
pub struct SysfsGpio {
    pin: u32,
    active_high: bool,
    value_path: PathBuf,
}

impl SysfsGpio {
    pub fn open(pin: u32, active_high: bool) -> Result<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, active_high)
    }

    /// Exports `pin` under `root` when needed and configures it as an input.
    pub fn open_at(root: &Path, pin: u32, active_high: bool) -> Result<Self> {
        let pin_dir = root.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("failed to export GPIO {pin}"))?;
        }
        if !pin_dir.exists() {
            bail!("GPIO {pin} did not appear under {}", root.display());
        }

        let direction = pin_dir.join("direction");
        if direction.exists() {
            fs::write(&direction, "in")
                .with_context(|| format!("failed to set GPIO {pin} as input"))?;
        }

        info!("Sensor on GPIO {pin} (active {})", if active_high { "high" } else { "low" });
        Ok(Self {
            pin,
            active_high,
            value_path: pin_dir.join("value"),
        })
    }
}

impl SensorInput for SysfsGpio {
    fn is_triggered(&self) -> Result<bool> {
        let raw = fs::read_to_string(&self.value_path)
            .with_context(|| format!("failed to read GPIO {}", self.pin))?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => bail!("unexpected GPIO {} value '{other}'", self.pin),
        };
        Ok(high == self.active_high)
    }
}
