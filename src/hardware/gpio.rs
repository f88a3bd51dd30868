//! Linux sysfs GPIO.

use super::{Indicators, MotionSensor};
use crate::occupancy::OccupancyState;
use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One exported sysfs GPIO line.
pub struct SysfsPin {
    pin: u32,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export `pin` under `root` if needed and set its direction (`in`/`out`).
    pub fn open(root: &Path, pin: u32, direction: &str) -> io::Result<Self> {
        let pin_dir = root.join(format!("gpio{}", pin));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())?;
        }
        fs::write(pin_dir.join("direction"), direction)?;

        Ok(Self {
            pin,
            value_path: pin_dir.join("value"),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn read(&self) -> io::Result<bool> {
        let value = fs::read_to_string(&self.value_path)?;
        match value.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("gpio{}: unexpected value '{}'", self.pin, other),
            )),
        }
    }

    pub fn write(&self, high: bool) -> io::Result<()> {
        fs::write(&self.value_path, if high { "1" } else { "0" })
    }
}

/// PIR sensor on a GPIO input. High means motion.
pub struct GpioMotionSensor {
    pin: SysfsPin,
}

impl GpioMotionSensor {
    pub fn open(root: &Path, pin: u32) -> io::Result<Self> {
        info!("[GPIO] Motion sensor on gpio{}", pin);
        Ok(Self {
            pin: SysfsPin::open(root, pin, "in")?,
        })
    }
}

impl MotionSensor for GpioMotionSensor {
    fn read(&mut self) -> io::Result<bool> {
        self.pin.read()
    }
}

/// Red (occupied) and green (free) LEDs.
pub struct GpioIndicators {
    occupied: SysfsPin,
    free: SysfsPin,
}

impl GpioIndicators {
    pub fn open(root: &Path, occupied_pin: u32, free_pin: u32) -> io::Result<Self> {
        Ok(Self {
            occupied: SysfsPin::open(root, occupied_pin, "out")?,
            free: SysfsPin::open(root, free_pin, "out")?,
        })
    }
}

impl Indicators for GpioIndicators {
    fn show(&mut self, state: OccupancyState) {
        let occupied = state.is_occupied();
        for (pin, high) in [(&self.occupied, occupied), (&self.free, !occupied)] {
            if let Err(e) = pin.write(high) {
                warn!("[GPIO] Failed to drive gpio{}: {}", pin.pin(), e);
            }
        }
    }
}
