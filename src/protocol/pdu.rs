//! Request payload builders and response payload parsers.
//!
//! Bit `i` of a coil / discrete input array lives in byte `i / 8` at bit
//! position `i % 8` (least significant bit first). Registers are 16-bit Big
//! Endian words in address order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ModbusError, Result};

/// Value written for a coil set to `true` by WriteSingleCoil.
pub const COIL_ON: u16 = 0xFF00;
/// Value written for a coil set to `false` by WriteSingleCoil.
pub const COIL_OFF: u16 = 0x0000;

/// Maximum quantity for ReadCoils / ReadDiscreteInputs.
pub const MAX_READ_BITS: u16 = 2000;
/// Maximum quantity for ReadHoldingRegisters / ReadInputRegisters.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum quantity for WriteMultipleCoils.
pub const MAX_WRITE_BITS: u16 = 1968;
/// Maximum quantity for WriteMultipleRegisters.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Number of bytes needed to hold `count` packed bits.
#[inline]
pub fn packed_len(count: usize) -> usize {
    count.div_ceil(8)
}

/// Pack booleans LSB-first; unused high bits of the last byte are zero.
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; packed_len(values.len())];
    for (i, _) in values.iter().enumerate().filter(|(_, v)| **v) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    bytes
}

/// Unpack `count` booleans from packed bytes. Extra high bits are ignored.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Result<Vec<bool>> {
    if bytes.len() < packed_len(count) {
        return Err(ModbusError::CorruptedData(format!(
            "{} bytes cannot hold {count} bits",
            bytes.len()
        )));
    }
    Ok((0..count)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

pub(crate) fn check_quantity(count: usize, max: u16, what: &str) -> Result<u16> {
    match u16::try_from(count) {
        Ok(n) if n > 0 && n <= max => Ok(n),
        _ => Err(ModbusError::Validation(format!(
            "{what} quantity {count} outside 1..={max}"
        ))),
    }
}

/// startAddress(2) + quantity(2).
pub fn read_request(start: u16, count: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(start);
    buf.put_u16(count);
    buf.freeze()
}

/// address(2) + value(2), with coils mapped to [`COIL_ON`] / [`COIL_OFF`].
pub fn write_single_request(address: u16, value: u16) -> Bytes {
    read_request(address, value)
}

/// startAddress(2) + quantity(2) + byteCount(1) + packed bits.
pub fn write_coils_request(start: u16, values: &[bool]) -> Result<Bytes> {
    let count = check_quantity(values.len(), MAX_WRITE_BITS, "write coils")?;
    let packed = pack_bits(values);

    let mut buf = BytesMut::with_capacity(5 + packed.len());
    buf.put_u16(start);
    buf.put_u16(count);
    // 1968 coils pack into 246 bytes
    buf.put_u8(packed.len() as u8);
    buf.put_slice(&packed);
    Ok(buf.freeze())
}

/// startAddress(2) + quantity(2) + byteCount(1) + words.
pub fn write_registers_request(start: u16, values: &[i16]) -> Result<Bytes> {
    let count = check_quantity(values.len(), MAX_WRITE_REGISTERS, "write registers")?;

    let mut buf = BytesMut::with_capacity(5 + values.len() * 2);
    buf.put_u16(start);
    buf.put_u16(count);
    buf.put_u8((values.len() * 2) as u8);
    for value in values {
        buf.put_i16(*value);
    }
    Ok(buf.freeze())
}

/// Parse a read-bits response: byteCount(1) + packed bits.
pub fn parse_bits_response(payload: &[u8], count: u16) -> Result<Vec<bool>> {
    let (byte_count, data) = split_byte_count(payload)?;
    if data.len() != byte_count {
        return Err(ModbusError::CorruptedData(format!(
            "byte count {byte_count} but {} data bytes",
            data.len()
        )));
    }
    unpack_bits(data, usize::from(count))
}

/// Parse a read-registers response: byteCount(1) + words.
pub fn parse_registers_response(payload: &[u8], count: u16) -> Result<Vec<i16>> {
    let (byte_count, mut data) = split_byte_count(payload)?;
    if byte_count / 2 != usize::from(count) {
        return Err(ModbusError::CorruptedData(format!(
            "byte count {byte_count} does not match {count} registers"
        )));
    }
    if data.len() < usize::from(count) * 2 {
        return Err(ModbusError::CorruptedData(format!(
            "{} data bytes cannot hold {count} registers",
            data.len()
        )));
    }
    Ok((0..count).map(|_| data.get_i16()).collect())
}

fn split_byte_count(payload: &[u8]) -> Result<(usize, &[u8])> {
    match payload.split_first() {
        Some((count, data)) => Ok((usize::from(*count), data)),
        None => Err(ModbusError::CorruptedData(
            "response carries no byte count".to_string(),
        )),
    }
}

/// Parse a register or coil address typed as text.
///
/// ```
/// use modbus_poll_client::protocol::parse_address;
///
/// assert_eq!(parse_address(" 100 ").unwrap(), 100);
/// assert!(parse_address("abc").is_err());
/// ```
pub fn parse_address(text: &str) -> Result<u16> {
    let text = text.trim();
    text.parse::<u16>()
        .map_err(|e| ModbusError::Validation(format!("invalid address {text:?}: {e}")))
}
