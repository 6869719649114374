use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace, warn};

use crate::DxlError;
use crate::packet::{Packet, PacketStreamDecoder, StatusPacket};

/// How long a servo gets to answer an instruction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Half duplex link to the servos, a serial port outside of tests.
pub trait Transport: Read + Write + Send {
    fn clear_input(&mut self) -> io::Result<()>;
}

impl Transport for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Model and firmware reported by a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingInfo {
    pub model: u16,
    pub firmware: u8,
}

/// Instruction/status transactions with servos on one bus.
pub struct Bus<T> {
    port: T,
    decoder: PacketStreamDecoder,
    timeout: Duration,
}

impl<T: Transport> Bus<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            decoder: PacketStreamDecoder::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    pub fn ping(&mut self, id: u8) -> Result<PingInfo, DxlError> {
        let status = self.transact(Packet::ping(id))?;
        match status.params[..] {
            [model_l, model_h, firmware, ..] => Ok(PingInfo {
                model: u16::from_le_bytes([model_l, model_h]),
                firmware,
            }),
            _ => Err(DxlError::ShortRead {
                id,
                expected: 3,
                actual: status.params.len(),
            }),
        }
    }

    pub fn read(&mut self, id: u8, address: u16, len: u16) -> Result<Vec<u8>, DxlError> {
        let status = self.transact(Packet::read(id, address, len))?;
        if status.params.len() != usize::from(len) {
            return Err(DxlError::ShortRead {
                id,
                expected: len.into(),
                actual: status.params.len(),
            });
        }
        Ok(status.params)
    }

    pub fn write(&mut self, id: u8, address: u16, data: &[u8]) -> Result<(), DxlError> {
        self.transact(Packet::write(id, address, data))?;
        Ok(())
    }

    pub fn read1(&mut self, id: u8, address: u16) -> Result<u8, DxlError> {
        Ok(self.read(id, address, 1)?[0])
    }

    pub fn read2(&mut self, id: u8, address: u16) -> Result<u16, DxlError> {
        let data = self.read(id, address, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    pub fn read4(&mut self, id: u8, address: u16) -> Result<u32, DxlError> {
        let data = self.read(id, address, 4)?;
        Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }

    pub fn write1(&mut self, id: u8, address: u16, value: u8) -> Result<(), DxlError> {
        self.write(id, address, &[value])
    }

    pub fn write4(&mut self, id: u8, address: u16, value: u32) -> Result<(), DxlError> {
        self.write(id, address, &value.to_le_bytes())
    }

    /// Sends an instruction and waits for the status packet of the same servo.
    fn transact(&mut self, instruction: Packet) -> Result<StatusPacket, DxlError> {
        let id = instruction.id;

        self.port.clear_input()?;
        self.decoder.clear();
        self.port.write_all(&instruction.encode())?;
        self.port.flush()?;
        trace!(id, instruction = instruction.instruction, "sent instruction");

        let deadline = Instant::now() + self.timeout;
        loop {
            let corrupted = self.decoder.corrupted();
            let mut result = Ok(());
            self.decoder.receive(|buffer| match self.port.read(buffer) {
                Ok(len) => len,
                Err(error) => {
                    result = Err(error);
                    0
                }
            });
            match result {
                Err(error) if !is_transient(&error) => return Err(error.into()),
                _ => {}
            }

            for packet in &mut self.decoder {
                let status = match StatusPacket::try_from(packet) {
                    Ok(status) => status,
                    // Our own instruction echoed back on some adapters
                    Err(error) => {
                        debug!(%error, "ignoring packet");
                        continue;
                    }
                };
                if status.id != id {
                    debug!(expected = id, got = status.id, "ignoring status of other servo");
                    continue;
                }
                if status.hardware_alert() {
                    warn!(id, "servo reports a hardware alert");
                }
                if let Some(error) = status.status_error() {
                    return Err(DxlError::Status { id, error });
                }
                return Ok(status);
            }
            if self.decoder.corrupted() != corrupted {
                warn!(id, "dropped corrupted status packet");
            }

            if Instant::now() >= deadline {
                return Err(DxlError::Timeout { id });
            }
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
