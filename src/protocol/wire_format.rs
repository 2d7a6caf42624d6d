//! Wire format encoding and decoding.
//!
//! Implements the 7-byte transaction header:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────┐
//! │ Trans ID │ Proto ID │ Length   │ Unit ID │
//! │ 2 bytes  │ 2 bytes  │ 2 bytes  │ 1 byte  │
//! │ uint16 BE│ uint16 BE│ uint16 BE│  0xFF   │
//! └──────────┴──────────┴──────────┴─────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use std::fmt;

use crate::error::{ModbusError, Result};

/// Header size in bytes (fixed, exactly 7).
pub const HEADER_SIZE: usize = 7;

/// Smallest decodable frame: header plus the function code byte.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 1;

/// Protocol identifier, always 0.
pub const PROTOCOL_ID: u16 = 0;

/// Unit identifier sent on every request. Per-unit addressing is unused.
pub const UNIT_ID: u8 = 0xFF;

/// Bit set in the function code of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// How the header `length` field relates to the payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthMode {
    /// `length` counts the function code and payload only.
    #[default]
    ExcludeUnitId,
    /// `length` also counts the unit id byte.
    IncludeUnitId,
}

impl LengthMode {
    fn overhead(self) -> usize {
        match self {
            LengthMode::ExcludeUnitId => 1,
            LengthMode::IncludeUnitId => 2,
        }
    }

    /// Header `length` for a payload of `payload_len` bytes.
    pub fn length_for(self, payload_len: usize) -> Result<u16> {
        u16::try_from(payload_len + self.overhead()).map_err(|_| {
            ModbusError::Validation(format!("payload of {payload_len} bytes does not fit a frame"))
        })
    }

    /// Payload size declared by a header `length`, or `None` if the length
    /// is too small to even cover the function code.
    pub fn payload_len_from(self, length: u16) -> Option<usize> {
        usize::from(length).checked_sub(self.overhead())
    }
}

/// Function codes understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Wire value of this function code.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0x01 => FunctionCode::ReadCoils,
            0x02 => FunctionCode::ReadDiscreteInputs,
            0x03 => FunctionCode::ReadHoldingRegisters,
            0x04 => FunctionCode::ReadInputRegisters,
            0x05 => FunctionCode::WriteSingleCoil,
            0x06 => FunctionCode::WriteSingleRegister,
            0x0F => FunctionCode::WriteMultipleCoils,
            0x10 => FunctionCode::WriteMultipleRegisters,
            other => return Err(other),
        })
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.code())
    }
}

/// Exception codes a device may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::ServerDeviceFailure => "server device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::ServerDeviceBusy => "server device busy",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => "gateway target failed to respond",
            ExceptionCode::Unknown(code) => return write!(f, "unknown exception 0x{code:02X}"),
        };
        f.write_str(text)
    }
}

/// Decoded transaction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Per-connection request counter.
    pub transaction_id: u16,
    /// Always 0 for this protocol.
    pub protocol_id: u16,
    /// Byte count of what follows the header (see [`LengthMode`]).
    pub length: u16,
    /// Unit identifier.
    pub unit_id: u8,
}

impl Header {
    /// Create a request header with the fixed protocol and unit ids.
    pub fn new(transaction_id: u16, length: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: PROTOCOL_ID,
            length,
            unit_id: UNIT_ID,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use modbus_poll_client::protocol::Header;
    ///
    /// let bytes = Header::new(0x0102, 5).encode();
    /// assert_eq!(bytes, [0x01, 0x02, 0x00, 0x00, 0x00, 0x05, 0xFF]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6] = self.unit_id;
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        })
    }
}
