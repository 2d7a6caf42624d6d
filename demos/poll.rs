//! Poll Monitor - watch the coils and discrete inputs of one device.
//!
//! This example demonstrates:
//! - Opening a client with `ModbusClient::builder()`
//! - Starting both polling tasks on a `Supervisor`
//! - Printing change notifications as JSON lines
//!
//! # Running
//!
//! ```text
//! cargo run --example poll -- 192.168.0.10
//! cargo run --example poll -- 127.0.0.1:1502 invert
//! ```
//!
//! Passing `invert` as second argument flips the coil block once after the
//! first poll. Stop with Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use modbus_poll_client::{ModbusClient, PollEvent, ResourceKind, Supervisor};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let invert = args.next().as_deref() == Some("invert");

    let client = Arc::new(ModbusClient::builder().build());
    client.open(&address).await?;

    let supervisor = Supervisor::builder()
        .poll_interval(Duration::from_millis(500))
        .build(client.clone());
    let mut events = supervisor.subscribe();

    for kind in ResourceKind::ALL {
        supervisor.start(kind);
    }

    if invert {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            match supervisor.invert_coils().await {
                Ok(values) => eprintln!("Coils written: {:?}", values),
                Err(e) => eprintln!("Failed to invert coils: {}", e),
            }
        });
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let PollEvent::Failed { .. } = event {
                        let status = supervisor.status(event.kind());
                        eprintln!("{} stopped: {:?}", event.kind(), status);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("Skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.stop_all();
    client.close();
    Ok(())
}
