//! TCP connection with bounded connect and single-shot reads.
//!
//! # Example
//!
//! ```ignore
//! use modbus_poll_client::transport::{resolve_target, Connection};
//!
//! let target = resolve_target("192.168.0.1", 502);
//! let mut conn = Connection::connect(&target, Duration::from_millis(1000)).await?;
//! conn.send(&frame).await?;
//! let n = conn.recv(&mut buf, Duration::from_millis(1000)).await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ModbusError, Result};

/// Turn a user supplied address into a `host:port` connect target.
///
/// Socket address literals and `host:port` strings are used as given;
/// a bare host gets `default_port`.
pub fn resolve_target(address: &str, default_port: u16) -> String {
    let address = address.trim();
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            address.to_string()
        }
        _ if address.contains(':') => format!("[{address}]:{default_port}"),
        _ => format!("{address}:{default_port}"),
    }
}

/// An established connection to the remote device.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    remote: String,
}

impl Connection {
    /// Connect to `target`, failing with a connection error after `timeout`.
    pub async fn connect(target: &str, timeout: Duration) -> Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::Connection(format!(
                    "cannot connect to {target}: {e}"
                )))
            }
            Err(_) => {
                return Err(ModbusError::Connection(format!(
                    "connect to {target} timed out after {} ms",
                    timeout.as_millis()
                )))
            }
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            remote: target.to_string(),
        })
    }

    /// Remote address this connection was opened to.
    #[inline]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Write a whole frame.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Perform exactly one read into `buf`.
    ///
    /// A read returning no data is an I/O error (the peer closed); no data
    /// within `timeout` is a connection error.
    pub async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match tokio::time::timeout(timeout, self.stream.read(buf)).await {
            Ok(Ok(0)) => Err(ModbusError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "cannot read data from socket",
            ))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(ModbusError::Io(e)),
            Err(_) => Err(ModbusError::Connection(format!(
                "no response from {} within {} ms",
                self.remote,
                timeout.as_millis()
            ))),
        }
    }
}
