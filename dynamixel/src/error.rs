use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::packet::{PacketError, StatusError};

#[derive(Debug, Error)]
pub enum DxlError {
    #[error("serial I/O failed")]
    Io(#[from] io::Error),
    #[error("could not open {path}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("no serial device matching {0}")]
    NoDevice(String),
    #[error("servo {id} did not answer")]
    Timeout { id: u8 },
    #[error("servo {id} sent an unusable reply")]
    Packet {
        id: u8,
        #[source]
        source: PacketError,
    },
    #[error("servo {id} reported {error}")]
    Status { id: u8, error: StatusError },
    #[error("servo {id} returned {actual} bytes, expected {expected}")]
    ShortRead {
        id: u8,
        expected: usize,
        actual: usize,
    },
    #[error("goal position {0} is above {max}", max = crate::MAX_POSITION)]
    PositionOutOfRange(u32),
    #[error("servo {0} is not configured")]
    UnknownServo(u8),
    #[error("bus lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported protocol version {0}, only 2.0 is supported")]
    Protocol(f32),
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
