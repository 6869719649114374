use std::cmp::Ordering;

use thiserror::Error;

pub const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];
pub const BROADCAST_ID: u8 = 0xFE;

/// Header, id and length field.
const PREFIX_LEN: usize = 7;
/// Prefix, instruction and CRC.
const MIN_PACKET_LEN: usize = PREFIX_LEN + 3;
const BUFFER_LEN: usize = 1024;

const STUFFING_PATTERN: [u8; 3] = [0xFF, 0xFF, 0xFD];
const STUFFING_BYTE: u8 = 0xFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    Status = 0x55,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet is incomplete")]
    Incomplete,
    #[error("packet is corrupted")]
    Corrupted,
    #[error("CRC mismatch (computed {computed:#06x}, received {received:#06x})")]
    Crc { computed: u16, received: u16 },
    #[error("expected a status packet, got instruction {0:#04x}")]
    NotStatus(u8),
}

/// Error reported by a servo in the status packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("result fail")]
    ResultFail,
    #[error("instruction error")]
    Instruction,
    #[error("CRC error")]
    Crc,
    #[error("data range error")]
    DataRange,
    #[error("data length error")]
    DataLength,
    #[error("data limit error")]
    DataLimit,
    #[error("access error")]
    Access,
    #[error("unknown error {0}")]
    Unknown(u8),
}

impl StatusError {
    const HARDWARE_ALERT: u8 = 0x80;

    /// `None` when the error byte reports success, the hardware alert bit is ignored.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte & !Self::HARDWARE_ALERT {
            0 => return None,
            1 => Self::ResultFail,
            2 => Self::Instruction,
            3 => Self::Crc,
            4 => Self::DataRange,
            5 => Self::DataLength,
            6 => Self::DataLimit,
            7 => Self::Access,
            other => Self::Unknown(other),
        })
    }
}

/// CRC-16 as used by protocol 2.0 (polynomial 0x8005, not reflected, zero init).
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &byte| {
        (0..8).fold(crc ^ (u16::from(byte) << 8), |crc, _| {
            if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            }
        })
    })
}

/// A protocol 2.0 packet with stuffing removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u8,
    pub instruction: u8,
    pub params: Vec<u8>,
}

impl Packet {
    pub fn new(id: u8, instruction: Instruction, params: Vec<u8>) -> Self {
        Self {
            id,
            instruction: instruction as u8,
            params,
        }
    }

    pub fn ping(id: u8) -> Self {
        Self::new(id, Instruction::Ping, Vec::new())
    }

    pub fn read(id: u8, address: u16, len: u16) -> Self {
        let mut params = address.to_le_bytes().to_vec();
        params.extend_from_slice(&len.to_le_bytes());
        Self::new(id, Instruction::Read, params)
    }

    pub fn write(id: u8, address: u16, data: &[u8]) -> Self {
        let mut params = address.to_le_bytes().to_vec();
        params.extend_from_slice(data);
        Self::new(id, Instruction::Write, params)
    }

    pub fn status(id: u8, error: u8, data: &[u8]) -> Self {
        let mut params = vec![error];
        params.extend_from_slice(data);
        Self::new(id, Instruction::Status, params)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.params.len() + 1);
        body.push(self.instruction);
        body.extend_from_slice(&self.params);
        let body = stuffed(&body);

        let mut encoded = Vec::with_capacity(PREFIX_LEN + body.len() + 2);
        encoded.extend_from_slice(&HEADER);
        encoded.push(self.id);
        encoded.extend_from_slice(&(body.len() as u16 + 2).to_le_bytes());
        encoded.extend_from_slice(&body);
        let crc = crc16(&encoded);
        encoded.extend_from_slice(&crc.to_le_bytes());
        encoded
    }

    /// Decodes exactly one packet.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < MIN_PACKET_LEN {
            return Err(PacketError::Incomplete);
        }
        if data[..HEADER.len()] != HEADER {
            return Err(PacketError::Corrupted);
        }

        let len = usize::from(u16::from_le_bytes([data[5], data[6]]));
        if len < 3 {
            return Err(PacketError::Corrupted);
        }
        match data.len().cmp(&(PREFIX_LEN + len)) {
            Ordering::Less => return Err(PacketError::Incomplete),
            Ordering::Greater => return Err(PacketError::Corrupted),
            Ordering::Equal => {}
        }

        let (packet, crc) = data.split_at(data.len() - 2);
        let computed = crc16(packet);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        if computed != received {
            return Err(PacketError::Crc { computed, received });
        }

        let body = unstuffed(&packet[PREFIX_LEN..]);
        let (&instruction, params) = body.split_first().ok_or(PacketError::Corrupted)?;

        Ok(Self {
            id: data[4],
            instruction,
            params: params.to_vec(),
        })
    }
}

/// Reply of a servo to an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: u8,
    pub params: Vec<u8>,
}

impl StatusPacket {
    pub fn hardware_alert(&self) -> bool {
        self.error & StatusError::HARDWARE_ALERT != 0
    }

    pub fn status_error(&self) -> Option<StatusError> {
        StatusError::from_byte(self.error)
    }
}

impl TryFrom<Packet> for StatusPacket {
    type Error = PacketError;

    fn try_from(packet: Packet) -> Result<Self, Self::Error> {
        if packet.instruction != Instruction::Status as u8 {
            return Err(PacketError::NotStatus(packet.instruction));
        }
        let (&error, params) = packet
            .params
            .split_first()
            .ok_or(PacketError::Corrupted)?;

        Ok(Self {
            id: packet.id,
            error,
            params: params.to_vec(),
        })
    }
}

fn stuffed(data: &[u8]) -> Vec<u8> {
    let mut stuffed = Vec::with_capacity(data.len() + data.len() / 3);
    for &byte in data {
        stuffed.push(byte);
        if stuffed.ends_with(&STUFFING_PATTERN) {
            stuffed.push(STUFFING_BYTE);
        }
    }
    stuffed
}

fn unstuffed(data: &[u8]) -> Vec<u8> {
    let mut unstuffed = Vec::with_capacity(data.len());
    for (i, &byte) in data.iter().enumerate() {
        let stuffing = byte == STUFFING_BYTE && i >= 3 && data[i - 3..i] == STUFFING_PATTERN;
        if !stuffing {
            unstuffed.push(byte);
        }
    }
    unstuffed
}

/// Splits a byte stream into packets, skipping noise and corrupted packets.
pub struct PacketStreamDecoder {
    buffer: [u8; BUFFER_LEN],
    len: usize,
    corrupted: usize,
}

impl PacketStreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: [0; BUFFER_LEN],
            len: 0,
            corrupted: 0,
        }
    }

    /// Read data into internal buffer, returns the number of bytes read.
    pub fn receive(&mut self, f: impl FnOnce(&mut [u8]) -> usize) -> usize {
        let read_len = f(&mut self.buffer[self.len..]);
        self.len += read_len;
        read_len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of packets dropped because they failed to decode.
    pub fn corrupted(&self) -> usize {
        self.corrupted
    }

    fn consume(&mut self, len: usize) {
        self.buffer.copy_within(len..self.len, 0);
        self.len -= len;
    }
}

impl Default for PacketStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for PacketStreamDecoder {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(start) = self.buffer[..self.len]
                .windows(HEADER.len())
                .position(|window| window == HEADER)
            else {
                // Keep what could be the start of a header
                let keep = self.len.min(HEADER.len() - 1);
                self.consume(self.len - keep);
                return None;
            };
            self.consume(start);

            if self.len < PREFIX_LEN {
                return None;
            }
            let len = PREFIX_LEN + usize::from(u16::from_le_bytes([self.buffer[5], self.buffer[6]]));
            if len < MIN_PACKET_LEN || len > BUFFER_LEN {
                self.corrupted += 1;
                self.consume(1);
                continue;
            }
            if self.len < len {
                return None;
            }

            match Packet::decode(&self.buffer[..len]) {
                Ok(packet) => {
                    self.consume(len);
                    return Some(packet);
                }
                Err(_) => {
                    // Resync on the next header, the length field may have been garbage
                    self.corrupted += 1;
                    self.consume(1);
                }
            }
        }
    }
}
