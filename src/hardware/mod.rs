//! Device I/O: the motion sensor, the indicator lights, and the network link.

mod gpio;
mod network;
mod simulation;

pub use gpio::{GpioIndicators, GpioMotionSensor, SysfsPin};
pub use network::InterfaceLink;
pub use simulation::{LogIndicators, SimulatedSensor};

use crate::config::HardwareConfig;
use crate::error::{AgentError, Result};
use crate::occupancy::OccupancyState;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Digital motion input.
pub trait MotionSensor {
    /// `true` while motion is present.
    fn read(&mut self) -> io::Result<bool>;
}

/// Occupied/free indicator outputs. Observational only.
pub trait Indicators {
    fn show(&mut self, state: OccupancyState);
}

/// Network attachment, managed outside the agent.
pub trait NetworkLink {
    fn is_attached(&self) -> bool;

    /// Ask the host to re-associate. Returns once the request is issued.
    fn force_reconnect(&mut self) -> io::Result<()>;
}

/// Where motion samples come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorSource {
    Gpio(u32),
    Simulated { on: Duration, off: Duration },
}

impl SensorSource {
    /// Parse `gpio:<pin>` or `sim:<on_ms>/<off_ms>`.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || AgentError::Config(format!("invalid SENSOR_SOURCE '{}'", spec));

        match spec.trim().split_once(':') {
            Some(("gpio", pin)) => pin.parse().map(SensorSource::Gpio).map_err(|_| invalid()),
            Some(("sim", timing)) => {
                let (on, off) = timing.split_once('/').ok_or_else(invalid)?;
                let on: u64 = on.parse().map_err(|_| invalid())?;
                let off: u64 = off.parse().map_err(|_| invalid())?;
                if on == 0 && off == 0 {
                    return Err(invalid());
                }
                Ok(SensorSource::Simulated {
                    on: Duration::from_millis(on),
                    off: Duration::from_millis(off),
                })
            }
            _ => Err(invalid()),
        }
    }

    pub fn open(&self, gpio_root: &Path) -> Result<Box<dyn MotionSensor>> {
        let sensor: Box<dyn MotionSensor> = match self {
            SensorSource::Gpio(pin) => Box::new(GpioMotionSensor::open(gpio_root, *pin)?),
            SensorSource::Simulated { on, off } => Box::new(SimulatedSensor::new(*on, *off)),
        };
        Ok(sensor)
    }
}

/// GPIO indicators when both pins are configured and a GPIO sensor is in
/// use, log output otherwise.
pub fn open_indicators(config: &HardwareConfig, source: &SensorSource) -> Result<Box<dyn Indicators>> {
    let indicators: Box<dyn Indicators> =
        match (source, config.led_occupied_pin, config.led_free_pin) {
            (SensorSource::Gpio(_), Some(occupied), Some(free)) => Box::new(GpioIndicators::open(
                Path::new(&config.gpio_root),
                occupied,
                free,
            )?),
            _ => Box::new(LogIndicators::default()),
        };
    Ok(indicators)
}
