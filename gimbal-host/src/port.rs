use std::time::Duration;

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::info;

use crate::HostError;

/// Reads block at most this long so the link worker gets to send commands.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Product strings of the USB serial bridges the gimbal boards ship with.
const KNOWN_PRODUCTS: [&str; 2] = ["Arduino", "FT232H"];

/// Finds the first serial port that looks like a gimbal controller.
pub fn find_gimbal_port() -> Result<String, HostError> {
    let ports = serialport::available_ports().map_err(HostError::ListPorts)?;

    match ports.iter().find(|port| is_gimbal(port)) {
        Some(port) => {
            info!(port = %port.port_name, "found gimbal");
            Ok(port.port_name.clone())
        }
        None => Err(HostError::PortNotFound {
            available: ports.into_iter().map(|port| port.port_name).collect(),
        }),
    }
}

fn is_gimbal(port: &SerialPortInfo) -> bool {
    if port.port_name.contains("usbmodem") {
        return true;
    }

    let SerialPortType::UsbPort(usb) = &port.port_type else {
        return false;
    };
    [usb.product.as_deref(), usb.manufacturer.as_deref()]
        .into_iter()
        .flatten()
        .any(|description| KNOWN_PRODUCTS.iter().any(|known| description.contains(known)))
}

pub fn open_port(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, HostError> {
    let port = serialport::new(path, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|source| HostError::Open {
            path: path.to_owned(),
            source,
        })?;
    info!(path, baud, "opened serial port");
    Ok(port)
}

/// Opens `path`, or the first gimbal port found when no path is given.
pub fn connect(path: Option<&str>, baud: u32) -> Result<Box<dyn SerialPort>, HostError> {
    match path {
        Some(path) => open_port(path, baud),
        None => open_port(&find_gimbal_port()?, baud),
    }
}

#[cfg(test)]
mod tests {
    use serialport::UsbPortInfo;

    use super::*;

    fn usb(name: &str, product: Option<&str>, manufacturer: Option<&str>) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_owned(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: None,
                manufacturer: manufacturer.map(str::to_owned),
                product: product.map(str::to_owned),
            }),
        }
    }

    #[test]
    fn recognizes_gimbal_bridges() {
        assert!(is_gimbal(&usb("/dev/ttyACM0", Some("Arduino Uno"), None)));
        assert!(is_gimbal(&usb("/dev/ttyUSB0", None, Some("FT232H"))));
        assert!(is_gimbal(&SerialPortInfo {
            port_name: "/dev/tty.usbmodem1101".to_owned(),
            port_type: SerialPortType::Unknown,
        }));
    }

    #[test]
    fn ignores_other_ports() {
        assert!(!is_gimbal(&usb("/dev/ttyUSB0", Some("CP2102"), Some("Silicon Labs"))));
        assert!(!is_gimbal(&SerialPortInfo {
            port_name: "/dev/ttyS0".to_owned(),
            port_type: SerialPortType::Unknown,
        }));
    }
}
