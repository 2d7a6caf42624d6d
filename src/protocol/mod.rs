//! Protocol module - wire format, framing, and request/response payloads.
//!
//! This module implements the binary protocol spoken on the socket:
//! - 7-byte transaction header encoding/decoding
//! - Frame codec (header + function code + payload)
//! - Bit packing and register word helpers for the typed operations

mod frame;
mod pdu;
mod wire_format;

pub use frame::{decode, encode, Frame, FrameCodec};
pub use pdu::{
    pack_bits, packed_len, parse_address, parse_bits_response, parse_registers_response,
    read_request, unpack_bits, write_coils_request, write_registers_request,
    write_single_request, COIL_OFF, COIL_ON, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS,
    MAX_WRITE_REGISTERS,
};
pub(crate) use pdu::check_quantity;
pub use wire_format::{
    ExceptionCode, FunctionCode, Header, LengthMode, EXCEPTION_FLAG, HEADER_SIZE,
    MIN_FRAME_SIZE, PROTOCOL_ID, UNIT_ID,
};
