// Feetech STS serial protocol
//
// Protocol is similar to Dynamixel Protocol 1.0:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]

use serialport::{self, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for Feetech motors
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Broadcast ID for sync instructions
const BROADCAST_ID: u8 = 0xFE;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncRead = 0x82,
    SyncWrite = 0x83,
}

/// RAM register addresses used by the wheel base
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity
    TorqueEnable = 40,    // 1 byte: 0=off, 1=on
    GoalVelocity = 46,    // 2 bytes (sign-magnitude, steps/s)
    Lock = 55,            // 1 byte: 0=unlocked, 1=locked
    PresentPosition = 56, // 2 bytes, 0..4095 per revolution
    PresentVoltage = 62,  // 1 byte, 0.1 V per unit
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

/// Error types for Feetech communication
#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

impl FeetechError {
    /// The port itself is gone, as opposed to a single lost or garbled packet
    pub fn is_disconnect(&self) -> bool {
        match self {
            FeetechError::Serial(e) => matches!(e.kind(), serialport::ErrorKind::NoDevice),
            FeetechError::Io(e) => matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::NotConnected
                    | ErrorKind::NotFound
                    | ErrorKind::PermissionDenied
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Feetech motor bus - handles serial communication with motors
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        // A short timeout keeps every transaction bounded within one control period
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Checksum over everything after the header
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        let checksum = Self::checksum(&packet[2..]);
        packet.push(checksum);

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], id: u8) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                FeetechError::Timeout { id }
            } else {
                FeetechError::Io(e)
            }
        })
    }

    /// Read one status packet and return its parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.read_exact(&mut header, expected_id)?;

        if header != HEADER {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.read_exact(&mut id_length, expected_id)?;
        let [id, length] = id_length;

        if id != expected_id {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // error + params + checksum
        let mut remaining = vec![0u8; length as usize];
        self.read_exact(&mut remaining, id)?;

        let (body, checksum) = remaining.split_at(remaining.len() - 1);
        let mut checksum_data = vec![id, length];
        checksum_data.extend_from_slice(body);
        if Self::checksum(&checksum_data) != checksum[0] {
            return Err(FeetechError::ChecksumMismatch { id });
        }

        let status = body[0];
        if status != 0 {
            return Err(FeetechError::MotorError { id, status });
        }

        Ok(body[1..].to_vec())
    }

    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        let packet = Self::build_packet(id, Instruction::Write, &[register as u8, value]);
        debug!("Write u8 to motor {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        self.read_response(id)?;
        Ok(())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        let packet = Self::build_packet(id, Instruction::Read, &[register as u8, 1]);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        response
            .first()
            .copied()
            .ok_or_else(|| FeetechError::InvalidResponse {
                id,
                reason: "Empty response".to_string(),
            })
    }

    /// Read the same 2-byte register from several motors in one transaction
    pub fn sync_read_u16(&mut self, register: Register, ids: &[u8]) -> Result<Vec<u16>> {
        let mut params = vec![register as u8, 2];
        params.extend_from_slice(ids);
        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncRead, &params);
        self.send_packet(&packet)?;

        // Each motor answers with its own status packet, in request order
        ids.iter()
            .map(|&id| {
                let response = self.read_response(id)?;
                match response.as_slice() {
                    [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
                    _ => Err(FeetechError::InvalidResponse {
                        id,
                        reason: format!("Expected 2 bytes, got {}", response.len()),
                    }),
                }
            })
            .collect()
    }

    /// Write signed 16-bit values to several motors at once (no response)
    pub fn sync_write_i16(&mut self, register: Register, data: &[(u8, i16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // [start_addr, data_length, id1, lo1, hi1, id2, lo2, hi2, ...]
        let mut params = vec![register as u8, 2];
        for &(id, value) in data {
            let [lo, hi] = encode_sign_magnitude(value).to_le_bytes();
            params.extend_from_slice(&[id, lo, hi]);
        }

        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("Sync write to {} motors: reg={:?}", data.len(), register);
        self.send_packet(&packet)
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Set operating mode (must disable torque first)
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }
}

/// Bit 15 = sign (1 = negative), Bits 0-14 = magnitude
pub fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let data = [1u8, 4, 0x03, 30, 0, 2];
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(FeetechBus::checksum(&data), 215);
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(encode_sign_magnitude(0), 0);
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(-1), 0x8001);
        assert_eq!(encode_sign_magnitude(i16::MIN), 0xFFFF);
    }

    #[test]
    fn test_sync_read_packet() {
        let params = [Register::PresentPosition as u8, 2, 1, 2];
        let packet = FeetechBus::build_packet(BROADCAST_ID, Instruction::SyncRead, &params);
        assert_eq!(&packet[..5], &[0xFF, 0xFF, 0xFE, 6, 0x82]);
        assert_eq!(&packet[5..9], &[56, 2, 1, 2]);
        assert_eq!(packet[9], FeetechBus::checksum(&packet[2..9]));
    }

    #[test]
    fn test_disconnect_classification() {
        let gone = FeetechError::Io(std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(gone.is_disconnect());
        assert!(!FeetechError::Timeout { id: 1 }.is_disconnect());
        assert!(!FeetechError::ChecksumMismatch { id: 2 }.is_disconnect());
    }
}
