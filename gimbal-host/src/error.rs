use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no gimbal serial port found (available: {})", .available.join(", "))]
    PortNotFound { available: Vec<String> },
    #[error("could not list serial ports")]
    ListPorts(#[source] serialport::Error),
    #[error("could not open {path}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("link worker has stopped")]
    LinkClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ControlError {
    #[error("speed {0} is outside {min}..={max}", min = gimbal_messages::MIN_SPEED, max = gimbal_messages::MAX_SPEED)]
    SpeedOutOfRange(f32),
    #[error("servo angle {0} is above {max}", max = gimbal_messages::MAX_SERVO_ANGLE)]
    AngleOutOfRange(u16),
}
