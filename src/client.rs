//! Client builder and request/response exchange.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client.
//! The [`ModbusClient`] owns one connection and serializes every request on
//! it through a single exchange:
//! 1. Allocate the next transaction id
//! 2. Encode and write the request frame
//! 3. Perform one bounded read of the response
//! 4. Decode, correlate and length-check the response
//!
//! # Example
//!
//! ```ignore
//! use modbus_poll_client::ModbusClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ModbusClient::builder().port(502).build();
//!     client.open("192.168.0.1").await?;
//!
//!     let coils = client.read_coils(0, 4).await?;
//!     client.write_single_register(100, 42).await?;
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::error::{ModbusError, Result};
use crate::protocol::{
    check_quantity, parse_bits_response, parse_registers_response, read_request,
    write_coils_request, write_registers_request, write_single_request, FrameCodec, FunctionCode,
    LengthMode, COIL_OFF, COIL_ON, EXCEPTION_FLAG, MAX_READ_BITS, MAX_READ_REGISTERS, PROTOCOL_ID,
};
use crate::transport::{resolve_target, Connection};

/// Default TCP port of the remote device.
pub const DEFAULT_PORT: u16 = 502;

/// Timeout for establishing the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the response read of one exchange.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default size of the single response read.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

/// Configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port used when `open` is given a bare host.
    pub port: u16,
    /// Header length convention for requests and response checks.
    pub length_mode: LengthMode,
    /// Buffer size of the single response read.
    pub recv_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            length_mode: LengthMode::default(),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// Builder for configuring and creating a [`ModbusClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the port used for bare host addresses.
    ///
    /// Default: 502
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the header length convention.
    ///
    /// Default: [`LengthMode::ExcludeUnitId`]
    pub fn length_mode(mut self, mode: LengthMode) -> Self {
        self.config.length_mode = mode;
        self
    }

    /// Set the response read buffer size.
    ///
    /// Default: 1024
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size.max(crate::protocol::MIN_FRAME_SIZE);
        self
    }

    /// Build a closed client.
    pub fn build(self) -> ModbusClient {
        ModbusClient::new(self.config)
    }
}

/// Snapshot of the client's exchange counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Exchanges attempted (one per allocated transaction id).
    pub requests: u64,
    /// Exchanges that ended in an error.
    pub failures: u64,
    /// Exchanges that ended because no response arrived in time.
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Master-side client over one stream connection.
///
/// All methods take `&self`; share the client behind an `Arc`. Only one
/// request is ever in flight: the connection mutex is held for the whole
/// encode-write-read-decode cycle.
#[derive(Debug)]
pub struct ModbusClient {
    config: ClientConfig,
    codec: FrameCodec,
    /// Exchange lock; `None` while closed.
    connection: Mutex<Option<Connection>>,
    open: AtomicBool,
    /// Bumped by `close` to abort an exchange blocked on the socket.
    closed: watch::Sender<u64>,
    transaction_id: AtomicU16,
    stats: StatsCounters,
}

impl ModbusClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a closed client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        let (closed, _) = watch::channel(0);
        Self {
            codec: FrameCodec::new(config.length_mode),
            config,
            connection: Mutex::new(None),
            open: AtomicBool::new(false),
            closed,
            transaction_id: AtomicU16::new(0),
            stats: StatsCounters::default(),
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the connection is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Transaction id the next request will carry.
    #[inline]
    pub fn next_transaction_id(&self) -> u16 {
        self.transaction_id.load(Ordering::Acquire)
    }

    /// Current exchange counters.
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            requests: self.stats.requests.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Open the connection to `address` (`host`, `host:port` or a socket
    /// address). No-op if already open.
    pub async fn open(&self, address: &str) -> Result<()> {
        let closed_rx = self.closed.subscribe();
        let mut guard = self.connection.lock().await;
        if guard.is_some() && self.is_open() {
            return Ok(());
        }

        let target = resolve_target(address, self.config.port);
        let conn = Connection::connect(&target, CONNECT_TIMEOUT).await?;

        if closed_rx.has_changed().unwrap_or(true) {
            return Err(ModbusError::Connection(format!(
                "connection to {target} closed while connecting"
            )));
        }

        tracing::info!("Connected to {}", conn.remote());
        *guard = Some(conn);
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Close the connection. Idempotent, never blocks.
    ///
    /// An exchange blocked on the socket fails with an I/O error and
    /// releases the socket itself.
    pub fn close(&self) {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        self.closed.send_modify(|epoch| *epoch = epoch.wrapping_add(1));

        if let Ok(mut guard) = self.connection.try_lock() {
            if let Some(conn) = guard.take() {
                tracing::info!("Closed connection to {}", conn.remote());
            }
        } else if was_open {
            tracing::debug!("Close requested during an exchange, aborting it");
        }
    }

    /// Read `count` coils starting at `start`.
    pub async fn read_coils(&self, start: u16, count: u16) -> Result<Vec<bool>> {
        let count = check_quantity(usize::from(count), MAX_READ_BITS, "read coils")?;
        let payload = self
            .exchange(FunctionCode::ReadCoils, &read_request(start, count))
            .await?;
        parse_bits_response(&payload, count)
    }

    /// Read `count` discrete inputs starting at `start`.
    pub async fn read_discrete_inputs(&self, start: u16, count: u16) -> Result<Vec<bool>> {
        let count = check_quantity(usize::from(count), MAX_READ_BITS, "read discrete inputs")?;
        let payload = self
            .exchange(FunctionCode::ReadDiscreteInputs, &read_request(start, count))
            .await?;
        parse_bits_response(&payload, count)
    }

    /// Read `count` holding registers starting at `start`.
    pub async fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<i16>> {
        let count = check_quantity(
            usize::from(count),
            MAX_READ_REGISTERS,
            "read holding registers",
        )?;
        let payload = self
            .exchange(FunctionCode::ReadHoldingRegisters, &read_request(start, count))
            .await?;
        parse_registers_response(&payload, count)
    }

    /// Read `count` input registers starting at `start`.
    pub async fn read_input_registers(&self, start: u16, count: u16) -> Result<Vec<i16>> {
        let count = check_quantity(
            usize::from(count),
            MAX_READ_REGISTERS,
            "read input registers",
        )?;
        let payload = self
            .exchange(FunctionCode::ReadInputRegisters, &read_request(start, count))
            .await?;
        parse_registers_response(&payload, count)
    }

    /// Write one coil.
    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<()> {
        let raw = if value { COIL_ON } else { COIL_OFF };
        self.exchange(FunctionCode::WriteSingleCoil, &write_single_request(address, raw))
            .await?;
        Ok(())
    }

    /// Write one holding register.
    pub async fn write_single_register(&self, address: u16, value: i16) -> Result<()> {
        self.exchange(
            FunctionCode::WriteSingleRegister,
            &write_single_request(address, value as u16),
        )
        .await?;
        Ok(())
    }

    /// Write consecutive coils starting at `start`.
    pub async fn write_multiple_coils(&self, start: u16, values: &[bool]) -> Result<()> {
        let payload = write_coils_request(start, values)?;
        self.exchange(FunctionCode::WriteMultipleCoils, &payload)
            .await?;
        Ok(())
    }

    /// Write consecutive holding registers starting at `start`.
    pub async fn write_multiple_registers(&self, start: u16, values: &[i16]) -> Result<()> {
        let payload = write_registers_request(start, values)?;
        self.exchange(FunctionCode::WriteMultipleRegisters, &payload)
            .await?;
        Ok(())
    }

    /// The single choke point for all requests. Returns the response payload.
    async fn exchange(&self, function: FunctionCode, payload: &[u8]) -> Result<Bytes> {
        // Subscribed before locking so a close racing the lock is not missed.
        let mut closed_rx = self.closed.subscribe();
        let mut guard = InFlight {
            connection: self.connection.lock().await,
            open: &self.open,
            pending: true,
        };

        let transaction_id = self.transaction_id.fetch_add(1, Ordering::AcqRel);
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        let result = self
            .exchange_locked(
                &mut guard.connection,
                &mut closed_rx,
                transaction_id,
                function,
                payload,
            )
            .await;
        guard.pending = false;

        if let Err(e) = &result {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            if matches!(e, ModbusError::Connection(_)) {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            if e.is_connection_lost() {
                if let Some(conn) = guard.connection.take() {
                    self.open.store(false, Ordering::Release);
                    tracing::warn!("Dropping connection to {}: {}", conn.remote(), e);
                }
            } else {
                tracing::warn!(
                    "{} request {} failed: {}",
                    function,
                    transaction_id,
                    e
                );
            }
        }
        self.release_if_closed(&mut guard.connection);
        result
    }

    /// Drop the socket if `close` ran while the exchange lock was held.
    fn release_if_closed(&self, slot: &mut Option<Connection>) {
        if self.is_open() {
            return;
        }
        if let Some(conn) = slot.take() {
            tracing::info!("Closed connection to {}", conn.remote());
        }
    }

    async fn exchange_locked(
        &self,
        slot: &mut Option<Connection>,
        closed_rx: &mut watch::Receiver<u64>,
        transaction_id: u16,
        function: FunctionCode,
        payload: &[u8],
    ) -> Result<Bytes> {
        if !self.is_open() {
            slot.take();
            return Err(ModbusError::NotConnected);
        }
        let conn = slot.as_mut().ok_or(ModbusError::NotConnected)?;

        let request = self.codec.encode(transaction_id, function, payload)?;
        tracing::debug!(
            "Sending {} request {} ({} bytes)",
            function,
            transaction_id,
            request.len()
        );

        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let n = tokio::select! {
            result = async {
                conn.send(&request).await?;
                conn.recv(&mut buf, READ_TIMEOUT).await
            } => result?,
            _ = closed_rx.changed() => {
                return Err(ModbusError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "connection closed during exchange",
                )));
            }
        };

        let frame = self.codec.decode(&buf[..n])?;
        tracing::debug!(
            "Received response {} ({} bytes)",
            frame.transaction_id(),
            n
        );

        if frame.transaction_id() != transaction_id {
            return Err(ModbusError::Protocol(format!(
                "transaction id mismatch: sent {}, received {}",
                transaction_id,
                frame.transaction_id()
            )));
        }
        if frame.header.protocol_id != PROTOCOL_ID {
            return Err(ModbusError::Protocol(format!(
                "unexpected protocol id {}",
                frame.header.protocol_id
            )));
        }
        if let Some(exception) = frame.exception() {
            if frame.function_code & !EXCEPTION_FLAG == function.code() {
                return Err(ModbusError::Protocol(format!(
                    "device rejected {function}: {exception}"
                )));
            }
        }
        if frame.function_code != function.code() {
            return Err(ModbusError::Protocol(format!(
                "function code mismatch: sent 0x{:02X}, received 0x{:02X}",
                function.code(),
                frame.function_code
            )));
        }
        frame.check_length(self.codec.mode())?;

        Ok(frame.payload)
    }
}

/// Exchange lock held for one request.
///
/// Dropped while `pending` means the caller abandoned the exchange after the
/// request may have been written; the reply would desynchronize the next
/// exchange, so the socket is discarded.
struct InFlight<'a> {
    connection: MutexGuard<'a, Option<Connection>>,
    open: &'a AtomicBool,
    pending: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        if let Some(conn) = self.connection.take() {
            self.open.store(false, Ordering::Release);
            tracing::warn!("Dropping connection to {}: exchange abandoned", conn.remote());
        }
    }
}

impl Default for ModbusClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
