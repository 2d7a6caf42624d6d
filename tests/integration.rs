//! Integration tests for modbus-poll-client.
//!
//! These tests run the client and supervisor against an in-process mock
//! device listening on the loopback interface.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modbus_poll_client::protocol::{
    decode, encode, pack_bits, Frame, FrameCodec, FunctionCode, LengthMode, HEADER_SIZE,
};
use modbus_poll_client::{
    ModbusClient, ModbusError, PollEvent, ResourceKind, Supervisor, TaskStatus,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

/// What the mock device does with a request.
enum Reply {
    Send(Vec<u8>),
    Silent,
}

/// Response frame answering `request` with `payload`.
fn answer(request: &Frame, payload: &[u8]) -> Reply {
    Reply::Send(
        encode(request.transaction_id(), request.function_code, payload)
            .unwrap()
            .to_vec(),
    )
}

/// Spawn a mock device. Every decoded request is forwarded on the returned
/// channel before `respond` is consulted.
async fn spawn_device<F>(mut respond: F) -> (String, mpsc::UnboundedReceiver<Frame>)
where
    F: FnMut(&Frame) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let request = decode(&buf[..n]).unwrap();
                let _ = tx.send(request.clone());
                if let Reply::Send(bytes) = respond(&request) {
                    if socket.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    (addr, rx)
}

/// Device with four coils and four discrete inputs held in shared state.
async fn spawn_io_device(
    coils: Arc<Mutex<Vec<bool>>>,
    inputs: Arc<Mutex<Vec<bool>>>,
) -> (String, mpsc::UnboundedReceiver<Frame>) {
    spawn_device(move |request| {
        let start = usize::from(u16::from_be_bytes([request.payload[0], request.payload[1]]));
        match FunctionCode::try_from(request.function_code) {
            Ok(FunctionCode::ReadCoils) | Ok(FunctionCode::ReadDiscreteInputs) => {
                let count =
                    usize::from(u16::from_be_bytes([request.payload[2], request.payload[3]]));
                let source = if request.function_code == FunctionCode::ReadCoils.code() {
                    coils.lock().unwrap().clone()
                } else {
                    inputs.lock().unwrap().clone()
                };
                let bits = pack_bits(&source[start..start + count]);
                let mut payload = vec![bits.len() as u8];
                payload.extend(bits);
                answer(request, &payload)
            }
            Ok(FunctionCode::WriteMultipleCoils) => {
                let count =
                    usize::from(u16::from_be_bytes([request.payload[2], request.payload[3]]));
                let data = &request.payload[5..];
                let mut coils = coils.lock().unwrap();
                for i in 0..count {
                    coils[start + i] = data[i / 8] & (1 << (i % 8)) != 0;
                }
                answer(request, &request.payload[..4])
            }
            _ => answer(request, &[0x01]),
        }
    })
    .await
}

async fn connect(addr: &str) -> Arc<ModbusClient> {
    let client = Arc::new(ModbusClient::default());
    client.open(addr).await.unwrap();
    client
}

async fn next_event(events: &mut broadcast::Receiver<PollEvent>) -> PollEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event within 2s")
        .expect("event channel closed")
}

fn fast_supervisor(client: Arc<ModbusClient>) -> Supervisor {
    Supervisor::builder()
        .poll_interval(Duration::from_millis(20))
        .build(client)
}

/// Holding register read: request layout and word decoding.
#[tokio::test]
async fn test_read_holding_registers() {
    let (addr, mut requests) =
        spawn_device(|request| answer(request, &[0x04, 0x00, 0x2A, 0x00, 0x2B])).await;
    let client = connect(&addr).await;

    let values = client.read_holding_registers(100, 2).await.unwrap();
    assert_eq!(values, vec![42, 43]);

    let request = requests.recv().await.unwrap();
    assert_eq!(request.function_code, 0x03);
    assert_eq!(request.payload(), &[0x00, 0x64, 0x00, 0x02]);
    assert_eq!(request.header.unit_id, 0xFF);
    assert_eq!(request.header.length, 5);
}

/// Coil read across a byte boundary.
#[tokio::test]
async fn test_read_coils_bit_order() {
    let (addr, mut requests) = spawn_device(|request| answer(request, &[0x02, 0xB1, 0x02])).await;
    let client = connect(&addr).await;

    let values = client.read_coils(0, 10).await.unwrap();
    assert_eq!(
        values,
        vec![true, false, false, false, true, true, false, true, false, true]
    );
    assert_eq!(requests.recv().await.unwrap().function_code, 0x01);
}

#[tokio::test]
async fn test_read_inputs_and_input_registers() {
    let (addr, _requests) = spawn_device(|request| match request.function_code {
        0x02 => answer(request, &[0x01, 0x05]),
        _ => answer(request, &[0x02, 0xFF, 0xFE]),
    })
    .await;
    let client = connect(&addr).await;

    assert_eq!(
        client.read_discrete_inputs(0, 3).await.unwrap(),
        vec![true, false, true]
    );
    assert_eq!(client.read_input_registers(0, 1).await.unwrap(), vec![-2]);
}

#[tokio::test]
async fn test_transaction_id_mismatch_is_protocol_error() {
    let (addr, _requests) = spawn_device(|request| {
        Reply::Send(
            encode(request.transaction_id().wrapping_add(1), request.function_code, &[0x00])
                .unwrap()
                .to_vec(),
        )
    })
    .await;
    let client = connect(&addr).await;

    let result = client.read_coils(0, 1).await;
    assert!(matches!(result, Err(ModbusError::Protocol(_))));
    // Protocol errors keep the connection
    assert!(client.is_open());
}

#[tokio::test]
async fn test_function_code_mismatch_is_protocol_error() {
    let (addr, _requests) = spawn_device(|request| {
        Reply::Send(
            encode(request.transaction_id(), FunctionCode::ReadInputRegisters, &[0x00])
                .unwrap()
                .to_vec(),
        )
    })
    .await;
    let client = connect(&addr).await;

    let result = client.read_holding_registers(0, 1).await;
    match result {
        Err(ModbusError::Protocol(message)) => assert!(message.contains("function code")),
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_exception_reply_is_protocol_error() {
    let (addr, _requests) = spawn_device(|request| {
        Reply::Send(
            encode(request.transaction_id(), request.function_code | 0x80, &[0x02])
                .unwrap()
                .to_vec(),
        )
    })
    .await;
    let client = connect(&addr).await;

    match client.write_single_register(9999, 1).await {
        Err(ModbusError::Protocol(message)) => {
            assert!(message.contains("illegal data address"))
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_register_byte_count_mismatch_is_corrupted() {
    let (addr, _requests) =
        spawn_device(|request| answer(request, &[0x03, 0x00, 0x2A, 0x00])).await;
    let client = connect(&addr).await;

    let result = client.read_holding_registers(0, 2).await;
    assert!(matches!(result, Err(ModbusError::CorruptedData(_))));
}

#[tokio::test]
async fn test_declared_length_mismatch_is_corrupted() {
    let (addr, _requests) = spawn_device(|request| {
        let mut bytes = encode(request.transaction_id(), request.function_code, &[0x01, 0x01])
            .unwrap()
            .to_vec();
        bytes.push(0xAA);
        Reply::Send(bytes)
    })
    .await;
    let client = connect(&addr).await;

    let result = client.read_coils(0, 1).await;
    assert!(matches!(result, Err(ModbusError::CorruptedData(_))));
}

#[tokio::test]
async fn test_include_unit_id_length_mode() {
    let codec = FrameCodec::new(LengthMode::IncludeUnitId);
    let (addr, mut requests) = spawn_device(move |request| {
        Reply::Send(
            codec
                .encode(request.transaction_id(), request.function_code, &[0x01, 0x01])
                .unwrap()
                .to_vec(),
        )
    })
    .await;
    let client = Arc::new(
        ModbusClient::builder()
            .length_mode(LengthMode::IncludeUnitId)
            .build(),
    );
    client.open(&addr).await.unwrap();

    assert_eq!(client.read_coils(0, 1).await.unwrap(), vec![true]);
    assert_eq!(requests.recv().await.unwrap().header.length, 6);
}

#[tokio::test]
async fn test_write_request_layouts() {
    let (addr, mut requests) =
        spawn_device(|request| answer(request, &request.payload[..4])).await;
    let client = connect(&addr).await;

    client.write_single_coil(3, true).await.unwrap();
    client.write_single_coil(4, false).await.unwrap();
    client.write_single_register(5, -1).await.unwrap();
    client.write_multiple_coils(0, &[true; 8]).await.unwrap();
    client.write_multiple_coils(0, &[true; 9]).await.unwrap();
    client.write_multiple_registers(7, &[1, 2]).await.unwrap();

    let mut next = || requests.try_recv().unwrap();

    let coil_on = next();
    assert_eq!(coil_on.function_code, 0x05);
    assert_eq!(coil_on.payload(), &[0x00, 0x03, 0xFF, 0x00]);

    assert_eq!(next().payload(), &[0x00, 0x04, 0x00, 0x00]);

    let register = next();
    assert_eq!(register.function_code, 0x06);
    assert_eq!(register.payload(), &[0x00, 0x05, 0xFF, 0xFF]);

    let eight = next();
    assert_eq!(eight.function_code, 0x0F);
    assert_eq!(eight.payload(), &[0x00, 0x00, 0x00, 0x08, 0x01, 0xFF]);

    let nine = next();
    assert_eq!(nine.payload(), &[0x00, 0x00, 0x00, 0x09, 0x02, 0xFF, 0x01]);

    let registers = next();
    assert_eq!(registers.function_code, 0x10);
    assert_eq!(
        registers.payload(),
        &[0x00, 0x07, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02]
    );
}

/// Ids advance by one per request, failed requests included.
#[tokio::test]
async fn test_transaction_ids_increment_on_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let device_calls = calls.clone();
    let (addr, mut requests) = spawn_device(move |request| {
        if device_calls.fetch_add(1, Ordering::SeqCst) == 1 {
            // Wrong function code on the second request only
            Reply::Send(encode(request.transaction_id(), 0x04u8, &[0x00]).unwrap().to_vec())
        } else {
            answer(request, &[0x01, 0x00])
        }
    })
    .await;
    let client = connect(&addr).await;

    assert!(client.read_coils(0, 1).await.is_ok());
    assert!(client.read_coils(0, 1).await.is_err());
    assert!(client.read_coils(0, 1).await.is_ok());

    let ids: Vec<u16> = (0..3)
        .map(|_| requests.try_recv().unwrap().transaction_id())
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(client.next_transaction_id(), 3);

    let stats = client.stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.failures, 1);
}

/// Concurrent callers never share an id and never overlap on the wire.
#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let overlapped = Arc::new(AtomicBool::new(false));
    let device_overlapped = overlapped.clone();

    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut ids = Vec::new();
        let mut buf = [0u8; 1024];
        while ids.len() < 16 {
            let n = socket.read(&mut buf).await.unwrap();
            let request = decode(&buf[..n]).unwrap();
            if n != HEADER_SIZE + usize::from(request.header.length) {
                device_overlapped.store(true, Ordering::SeqCst);
            }
            // Nothing else may arrive while this request is unanswered
            let mut extra = [0u8; 64];
            if tokio::time::timeout(Duration::from_millis(5), socket.read(&mut extra))
                .await
                .is_ok()
            {
                device_overlapped.store(true, Ordering::SeqCst);
            }
            ids.push(request.transaction_id());
            let reply = encode(request.transaction_id(), request.function_code, &[0x01, 0x01])
                .unwrap();
            socket.write_all(&reply).await.unwrap();
        }
        ids
    });

    let client = connect(&addr).await;
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.read_coils(0, 1).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), vec![true]);
    }

    let mut ids = device.await.unwrap();
    ids.sort_unstable();
    assert_eq!(ids, (0..16).collect::<Vec<u16>>());
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_peer_close_is_io_error_and_closes_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = socket.read(&mut buf).await;
        // Drop without answering
    });

    let client = connect(&addr).await;
    let result = client.read_coils(0, 1).await;
    assert!(matches!(result, Err(ModbusError::Io(_))));
    assert!(!client.is_open());

    assert!(matches!(
        client.read_coils(0, 1).await,
        Err(ModbusError::NotConnected)
    ));
}

/// A caller giving up on a request must not leave its late reply for the
/// next exchange to read.
#[tokio::test]
async fn test_abandoned_request_discards_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let request = decode(&buf[..n]).unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let reply =
                        encode(request.transaction_id(), request.function_code, &[0x01, 0x01])
                            .unwrap();
                    if socket.write_all(&reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let client = connect(&addr).await;
    let abandoned = tokio::time::timeout(Duration::from_millis(10), client.read_coils(0, 1)).await;
    assert!(abandoned.is_err());
    assert!(!client.is_open());

    // Let the stale reply arrive; it must not be read by anyone
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(matches!(
        client.read_coils(0, 1).await,
        Err(ModbusError::NotConnected)
    ));

    client.open(&addr).await.unwrap();
    for _ in 0..3 {
        assert_eq!(client.read_coils(0, 1).await.unwrap(), vec![true]);
    }
    assert!(client.is_open());
}

#[tokio::test]
async fn test_read_timeout_is_connection_error() {
    let (addr, _requests) = spawn_device(|_| Reply::Silent).await;
    let client = connect(&addr).await;

    let result = client.read_coils(0, 1).await;
    assert!(matches!(result, Err(ModbusError::Connection(_))));
    assert_eq!(client.stats().timeouts, 1);
}

#[tokio::test]
async fn test_open_is_idempotent_and_reopens_after_close() {
    let (addr, _requests) = spawn_device(|request| answer(request, &[0x01, 0x01])).await;
    let client = connect(&addr).await;

    client.open(&addr).await.unwrap();
    assert!(client.is_open());

    client.close();
    client.close();
    assert!(!client.is_open());

    client.open(&addr).await.unwrap();
    assert_eq!(client.read_coils(0, 1).await.unwrap(), vec![true]);
}

/// Polling publishes every point first, then only the points that change.
#[tokio::test]
async fn test_polling_publishes_changes_only() {
    let coils = Arc::new(Mutex::new(vec![true, false, true, false]));
    let inputs = Arc::new(Mutex::new(vec![false; 4]));
    let (addr, _requests) = spawn_io_device(coils.clone(), inputs).await;
    let supervisor = fast_supervisor(connect(&addr).await);
    let mut events = supervisor.subscribe();

    supervisor.start(ResourceKind::Coils);

    let mut first = Vec::new();
    for _ in 0..4 {
        first.push(next_event(&mut events).await);
    }
    assert_eq!(
        first,
        vec![
            PollEvent::Changed { kind: ResourceKind::Coils, index: 0, value: true },
            PollEvent::Changed { kind: ResourceKind::Coils, index: 1, value: false },
            PollEvent::Changed { kind: ResourceKind::Coils, index: 2, value: true },
            PollEvent::Changed { kind: ResourceKind::Coils, index: 3, value: false },
        ]
    );

    coils.lock().unwrap()[1] = true;
    assert_eq!(
        next_event(&mut events).await,
        PollEvent::Changed { kind: ResourceKind::Coils, index: 1, value: true }
    );
    assert_eq!(
        supervisor.last_sample(ResourceKind::Coils),
        Some(vec![true, true, true, false])
    );

    supervisor.stop(ResourceKind::Coils);
    assert_eq!(supervisor.status(ResourceKind::Coils), TaskStatus::default());
}

#[tokio::test]
async fn test_polling_uses_start_address() {
    let coils = Arc::new(Mutex::new(vec![false; 4]));
    let inputs = Arc::new(Mutex::new(vec![false, false, true, true, false, true]));
    let (addr, mut requests) = spawn_io_device(coils, inputs).await;
    let supervisor = fast_supervisor(connect(&addr).await);
    let mut events = supervisor.subscribe();

    supervisor.set_start_address(ResourceKind::DiscreteInputs, 2);
    supervisor.start(ResourceKind::DiscreteInputs);

    let request = requests.recv().await.unwrap();
    assert_eq!(request.function_code, 0x02);
    assert_eq!(request.payload(), &[0x00, 0x02, 0x00, 0x04]);

    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        PollEvent::Changed { kind: ResourceKind::DiscreteInputs, index: 0, value: true }
    );
    supervisor.stop_all();
}

/// Hide suspends running tasks; show restores exactly the ones the user
/// still wants.
#[tokio::test]
async fn test_visibility_restores_user_intent() {
    let coils = Arc::new(Mutex::new(vec![false; 4]));
    let inputs = Arc::new(Mutex::new(vec![false; 4]));
    let (addr, mut requests) = spawn_io_device(coils, inputs).await;
    let supervisor = fast_supervisor(connect(&addr).await);

    supervisor.start(ResourceKind::Coils);
    supervisor.start(ResourceKind::DiscreteInputs);
    supervisor.stop(ResourceKind::DiscreteInputs);

    supervisor.on_visibility_hide();
    assert_eq!(
        supervisor.status(ResourceKind::Coils),
        TaskStatus { user_active: true, running: false, suspended_by_visibility: true }
    );
    assert_eq!(supervisor.status(ResourceKind::DiscreteInputs), TaskStatus::default());

    // Let suspended loops wind down, then forget what they sent
    tokio::time::sleep(Duration::from_millis(100)).await;
    while requests.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(requests.try_recv().is_err(), "no polling while hidden");

    supervisor.on_visibility_show();
    assert_eq!(
        supervisor.status(ResourceKind::Coils),
        TaskStatus { user_active: true, running: true, suspended_by_visibility: false }
    );
    assert_eq!(supervisor.status(ResourceKind::DiscreteInputs), TaskStatus::default());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut resumed = Vec::new();
    while let Ok(request) = requests.try_recv() {
        resumed.push(request.function_code);
    }
    assert!(!resumed.is_empty());
    assert!(resumed.iter().all(|code| *code == 0x01));

    supervisor.stop_all();
}

/// Closing the connection under a blocked read ends the task instead of
/// retrying.
#[tokio::test]
async fn test_close_aborts_blocked_poll() {
    let (addr, mut requests) = spawn_device(|_| Reply::Silent).await;
    let client = connect(&addr).await;
    let supervisor = fast_supervisor(client.clone());
    let mut events = supervisor.subscribe();

    supervisor.start(ResourceKind::Coils);
    requests.recv().await.unwrap();

    client.close();

    match next_event(&mut events).await {
        PollEvent::Failed { kind, message } => {
            assert_eq!(kind, ResourceKind::Coils);
            assert!(message.starts_with("I/O error"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(supervisor.status(ResourceKind::Coils), TaskStatus::default());
    assert!(!client.is_open());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(requests.try_recv().is_err(), "terminated task must not retry");
}

#[tokio::test]
async fn test_invert_coils() {
    let coils = Arc::new(Mutex::new(vec![true, false, true, false]));
    let inputs = Arc::new(Mutex::new(vec![false; 4]));
    let (addr, mut requests) = spawn_io_device(coils.clone(), inputs).await;
    let supervisor = fast_supervisor(connect(&addr).await);
    let mut events = supervisor.subscribe();

    let written = supervisor.invert_coils().await.unwrap();
    assert_eq!(written, vec![false, true, false, true]);
    assert_eq!(*coils.lock().unwrap(), vec![false, true, false, true]);

    // No cached sample yet: read first, then write
    assert_eq!(requests.recv().await.unwrap().function_code, 0x01);
    let write = requests.recv().await.unwrap();
    assert_eq!(write.function_code, 0x0F);
    assert_eq!(write.payload(), &[0x00, 0x00, 0x00, 0x04, 0x01, 0x0A]);

    for index in 0..4 {
        assert_eq!(
            next_event(&mut events).await,
            PollEvent::Changed { kind: ResourceKind::Coils, index, value: index % 2 == 1 }
        );
    }
    assert_eq!(supervisor.last_sample(ResourceKind::Coils), Some(written));

    // Cached sample present: write only
    supervisor.invert_coils().await.unwrap();
    assert_eq!(requests.recv().await.unwrap().function_code, 0x0F);
    assert_eq!(*coils.lock().unwrap(), vec![true, false, true, false]);
}

#[test]
fn test_events_serialize_as_json() {
    let event = PollEvent::Changed {
        kind: ResourceKind::DiscreteInputs,
        index: 2,
        value: true,
    };
    assert_eq!(
        serde_json::to_string(&event).unwrap(),
        r#"{"type":"changed","kind":"discreteInputs","index":2,"value":true}"#
    );
}
