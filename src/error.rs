//! Error types for modbus-poll-client.

use thiserror::Error;

/// Main error type for all client and supervisor operations.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Connect failure, or a connect/read timeout.
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error on the socket (including a read that returned no data).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request was issued while the connection is closed.
    #[error("Not connected")]
    NotConnected,

    /// Response does not belong to the request (transaction id, function
    /// code, protocol id) or the device answered with an exception.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Declared length or byte count disagrees with the bytes received.
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Not enough bytes to hold a header and a function code.
    #[error("Framing error: frame of {len} bytes is shorter than the 8 byte minimum")]
    Framing { len: usize },

    /// Caller input outside what the protocol can express.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ModbusError {
    /// Whether this error leaves the socket unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ModbusError::Connection(_) | ModbusError::Io(_) | ModbusError::NotConnected
        )
    }
}

/// Result type alias using ModbusError.
pub type Result<T> = std::result::Result<T, ModbusError>;
