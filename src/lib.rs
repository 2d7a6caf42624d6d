//! # modbus-poll-client
//!
//! Master-side Modbus/TCP client with a polling supervisor.
//!
//! This crate lets an application read and write the coils, discrete
//! inputs and registers of one remote device, and keep a live view of its
//! bit inputs through periodic polling.
//!
//! ## Architecture
//!
//! - **Protocol**: 7-byte header + function code + payload framing, bit and
//!   register payload helpers (pure, stateless)
//! - **Client**: one connection, one request in flight, typed operations
//! - **Poller**: per-kind polling loops publishing only changed points,
//!   suspended and resumed with the consumer's visibility
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use modbus_poll_client::{ModbusClient, ResourceKind, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(ModbusClient::builder().build());
//!     client.open("192.168.0.1").await?;
//!
//!     let supervisor = Supervisor::builder().build(client.clone());
//!     let mut events = supervisor.subscribe();
//!     supervisor.start(ResourceKind::Coils);
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod poller;
pub mod protocol;
pub mod transport;

mod client;

pub use client::{
    ClientBuilder, ClientConfig, ClientStats, ModbusClient, CONNECT_TIMEOUT, DEFAULT_PORT,
    DEFAULT_RECV_BUFFER_SIZE, READ_TIMEOUT,
};
pub use error::{ModbusError, Result};
pub use poller::{PollEvent, ResourceKind, Supervisor, SupervisorBuilder, TaskStatus};
