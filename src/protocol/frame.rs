//! Frame struct and the header + function code + payload codec.
//!
//! Encoding is pure and stateless. The only knob is the [`LengthMode`]
//! used to fill and check the header `length` field.
//!
//! # Example
//!
//! ```
//! use modbus_poll_client::protocol::{decode, encode, FunctionCode};
//!
//! let bytes = encode(7, FunctionCode::ReadCoils, &[0x00, 0x00, 0x00, 0x0A]).unwrap();
//! assert_eq!(&bytes[..], &[0, 7, 0, 0, 0, 5, 0xFF, 0x01, 0, 0, 0, 0x0A]);
//!
//! let frame = decode(&bytes).unwrap();
//! assert_eq!(frame.transaction_id(), 7);
//! assert_eq!(frame.payload(), &[0x00, 0x00, 0x00, 0x0A]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    ExceptionCode, FunctionCode, Header, LengthMode, EXCEPTION_FLAG, HEADER_SIZE, MIN_FRAME_SIZE,
};
use crate::error::{ModbusError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Raw function code byte (may carry the exception flag).
    pub function_code: u8,
    /// Bytes following the function code.
    pub payload: Bytes,
}

impl Frame {
    /// Get the transaction ID.
    #[inline]
    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// If this is an exception reply, the exception it carries.
    pub fn exception(&self) -> Option<ExceptionCode> {
        if self.function_code & EXCEPTION_FLAG == 0 {
            return None;
        }
        Some(ExceptionCode::from(self.payload.first().copied().unwrap_or(0)))
    }

    /// Check that the header `length` agrees with the payload actually held.
    pub fn check_length(&self, mode: LengthMode) -> Result<()> {
        let actual = self.payload.len();
        match mode.payload_len_from(self.header.length) {
            Some(declared) if declared == actual => Ok(()),
            Some(declared) => Err(ModbusError::CorruptedData(format!(
                "header declares {declared} payload bytes, received {actual}"
            ))),
            None => Err(ModbusError::CorruptedData(format!(
                "header length {} is too small",
                self.header.length
            ))),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(code: FunctionCode) -> Self {
        code.code()
    }
}

/// Frame codec bound to a [`LengthMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    mode: LengthMode,
}

impl FrameCodec {
    /// Create a codec using the given length convention.
    pub fn new(mode: LengthMode) -> Self {
        Self { mode }
    }

    /// The length convention in use.
    #[inline]
    pub fn mode(&self) -> LengthMode {
        self.mode
    }

    /// Build a complete frame as a single contiguous buffer.
    pub fn encode(
        &self,
        transaction_id: u16,
        function_code: impl Into<u8>,
        payload: &[u8],
    ) -> Result<Bytes> {
        let header = Header::new(transaction_id, self.mode.length_for(payload.len())?);

        let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
        buf.put_slice(&header.encode());
        buf.put_u8(function_code.into());
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Split a received buffer into header, function code and payload.
    ///
    /// Everything after the function code is taken as payload; the length
    /// field is not checked here (see [`Frame::check_length`]).
    pub fn decode(&self, buf: &[u8]) -> Result<Frame> {
        if buf.len() < MIN_FRAME_SIZE {
            return Err(ModbusError::Framing { len: buf.len() });
        }
        let header = Header::decode(buf).ok_or(ModbusError::Framing { len: buf.len() })?;

        Ok(Frame {
            header,
            function_code: buf[HEADER_SIZE],
            payload: Bytes::copy_from_slice(&buf[MIN_FRAME_SIZE..]),
        })
    }
}

/// Encode a frame with the default length convention.
pub fn encode(transaction_id: u16, function_code: impl Into<u8>, payload: &[u8]) -> Result<Bytes> {
    FrameCodec::default().encode(transaction_id, function_code, payload)
}

/// Decode a frame (standalone function).
pub fn decode(buf: &[u8]) -> Result<Frame> {
    FrameCodec::default().decode(buf)
}
