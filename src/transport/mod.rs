//! Transport module - the stream socket under the client.
//!
//! Provides a thin wrapper over a TCP stream with bounded connect and read.

mod tcp;

pub use tcp::{resolve_target, Connection};
