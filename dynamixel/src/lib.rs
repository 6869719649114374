//! Dynamixel servos over protocol 2.0.
//!
//! [`packet`] is the wire format, [`Bus`] runs instruction/status transactions over a
//! [`Transport`], and [`Controller`] maps servo operations onto the registers named in the
//! YAML [`DynamixelSettings`].

mod bus;
mod config;
mod controller;
mod error;
pub mod packet;
mod poll;
mod random;

use std::time::Duration;

pub use bus::{Bus, DEFAULT_TIMEOUT, PingInfo, Transport};
pub use config::{AUTO_DEVICE, DynamixelSettings};
pub use controller::{Controller, MAX_POSITION, ServoStatus, rpm_to_units, units_to_rpm};
pub use error::{ConfigError, DxlError};
pub use poll::{STATUS_INTERVAL, StatusPoller, StatusReport};
pub use random::{RandomMotion, RandomPlanner};

/// Reads give up after this long without data, transactions retry until [`DEFAULT_TIMEOUT`].
const PORT_TIMEOUT: Duration = Duration::from_millis(10);

/// Controller on a real serial device, as returned by [`open`].
pub type SerialController = Controller<Box<dyn serialport::SerialPort>>;

/// Opens the configured serial device and wraps it in a controller.
pub fn open(settings: DynamixelSettings) -> Result<SerialController, DxlError> {
    let path = settings.device()?;
    let port = serialport::new(&path, settings.baudrate)
        .timeout(PORT_TIMEOUT)
        .open()
        .map_err(|source| DxlError::Open {
            path: path.clone(),
            source,
        })?;
    tracing::info!(%path, baud = settings.baudrate, "opened port");

    Ok(Controller::new(Bus::new(port), settings))
}
