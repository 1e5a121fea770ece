//! End-to-end exercises of the master against a simulated slave.

use std::sync::Arc;
use std::time::Duration;

use sermod_master::{ExceptionCode, MasterConfig, MasterError, ReconnectPolicy, RtuMaster};
use sermod_transport::{SimProvider, SimSlave, SlaveFault};

fn register_bank(len: usize) -> Vec<u16> {
    (0..len).map(|i| (i as u16).wrapping_mul(3)).collect()
}

fn coil_bank(len: usize) -> Vec<bool> {
    (0..len).map(|i| i % 3 == 0).collect()
}

async fn connected_master(slave: SimSlave) -> (Arc<SimProvider>, RtuMaster) {
    let provider = Arc::new(SimProvider::new(slave));
    let master = RtuMaster::new(Arc::clone(&provider) as _, MasterConfig::default());
    master.connect().await.expect("connect");
    (provider, master)
}

/// Wait for `predicate` to turn true, failing the test after two seconds.
async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn reads_holding_registers_of_various_sizes() {
    let bank = register_bank(125);
    let (_provider, master) =
        connected_master(SimSlave::new(1).with_holding_registers(bank.clone())).await;

    assert_eq!(
        master.read_holding_registers(1, 0, 1).await.unwrap(),
        bank[..1]
    );
    assert_eq!(
        master.read_holding_registers(1, 5, 2).await.unwrap(),
        bank[5..7]
    );
    assert_eq!(
        master.read_holding_registers(1, 0, 125).await.unwrap(),
        bank
    );
}

#[tokio::test]
async fn reads_all_four_point_tables() {
    let slave = SimSlave::new(9)
        .with_holding_registers(vec![17, 34])
        .with_input_registers(vec![100, 200, 300])
        .with_coils(vec![true, false, true])
        .with_discrete_inputs(vec![false, true]);
    let (_provider, master) = connected_master(slave).await;

    assert_eq!(
        master.read_holding_registers(9, 0, 2).await.unwrap(),
        vec![17, 34]
    );
    assert_eq!(
        master.read_input_registers(9, 1, 2).await.unwrap(),
        vec![200, 300]
    );
    assert_eq!(
        master.read_coils(9, 0, 3).await.unwrap(),
        vec![true, false, true]
    );
    assert_eq!(
        master.read_discrete_inputs(9, 0, 2).await.unwrap(),
        vec![false, true]
    );
}

#[tokio::test]
async fn coil_quantities_around_byte_boundaries() {
    let bank = coil_bank(2000);
    let (_provider, master) = connected_master(SimSlave::new(1).with_coils(bank.clone())).await;

    for quantity in [1u16, 8, 9, 2000] {
        let values = master.read_coils(1, 0, quantity).await.unwrap();
        assert_eq!(values, bank[..usize::from(quantity)], "quantity {quantity}");
    }
}

#[tokio::test]
async fn reassembles_responses_delivered_in_small_chunks() {
    let bank = register_bank(50);
    let (provider, master) =
        connected_master(SimSlave::new(1).with_holding_registers(bank.clone())).await;
    provider.transport().set_chunk_size(3);

    assert_eq!(master.read_holding_registers(1, 0, 50).await.unwrap(), bank);
}

#[tokio::test]
async fn slave_exception_is_reported_with_its_code() {
    let (provider, master) =
        connected_master(SimSlave::new(1).with_holding_registers(vec![1, 2, 3])).await;
    provider
        .transport()
        .with_slave(|slave| slave.set_fault(SlaveFault::Exception(0x02)));

    let err = master.read_holding_registers(1, 0, 1).await.unwrap_err();
    match err {
        MasterError::Exception(code) => {
            assert_eq!(code, ExceptionCode::IllegalDataAddress);
            assert_eq!(code.label(), "Illegal Data Address");
        }
        other => panic!("expected exception, got {other:?}"),
    }
}

#[tokio::test]
async fn out_of_range_address_yields_illegal_data_address() {
    let (_provider, master) =
        connected_master(SimSlave::new(1).with_holding_registers(vec![1, 2, 3])).await;

    let err = master.read_holding_registers(1, 2, 2).await.unwrap_err();
    assert!(matches!(
        err,
        MasterError::Exception(ExceptionCode::IllegalDataAddress)
    ));
}

#[tokio::test]
async fn silent_slave_times_out_and_reader_is_replaced() {
    let provider = Arc::new(SimProvider::new(
        SimSlave::new(1).with_holding_registers(vec![42]),
    ));
    let transport = provider.transport();
    let config = MasterConfig::default().with_timeout(Duration::from_millis(50));
    let master = RtuMaster::new(Arc::clone(&provider) as _, config);
    master.connect().await.unwrap();
    transport.with_slave(|slave| slave.set_fault(SlaveFault::Silent));

    let err = master.read_holding_registers(1, 0, 1).await.unwrap_err();
    assert!(matches!(err, MasterError::Timeout));

    // The stale handle was cancelled and released exactly once and a fresh
    // one acquired in its place.
    assert_eq!(transport.reader_acquire_count(), 2);
    assert_eq!(transport.reader_cancel_count(), 1);
    assert_eq!(transport.reader_release_count(), 1);
    assert!(master.is_connected());

    // The connection keeps working once the slave answers again.
    transport.with_slave(|slave| slave.set_fault(SlaveFault::None));
    assert_eq!(
        master.read_holding_registers(1, 0, 1).await.unwrap(),
        vec![42]
    );
}

#[tokio::test]
async fn corrupted_checksum_is_rejected_with_both_values() {
    let (provider, master) =
        connected_master(SimSlave::new(1).with_holding_registers(vec![42])).await;
    provider
        .transport()
        .with_slave(|slave| slave.set_fault(SlaveFault::CorruptCrc));

    let err = master.read_holding_registers(1, 0, 1).await.unwrap_err();
    match err {
        MasterError::CrcMismatch {
            calculated,
            received,
        } => assert_ne!(calculated, received),
        other => panic!("expected crc mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn detach_then_attach_recovers_without_caller_intervention() {
    let provider = Arc::new(SimProvider::new(
        SimSlave::new(1).with_holding_registers(vec![7, 8]),
    ));
    let config = MasterConfig::default().with_reconnect(
        ReconnectPolicy::default().with_interval(Duration::from_millis(20)),
    );
    let master = RtuMaster::new(Arc::clone(&provider) as _, config);
    master.connect().await.unwrap();
    assert_eq!(
        master.read_holding_registers(1, 0, 2).await.unwrap(),
        vec![7, 8]
    );

    provider.detach();
    wait_until("loss to be noticed", || !master.is_connected()).await;
    let err = master.read_holding_registers(1, 0, 2).await.unwrap_err();
    assert!(
        matches!(err, MasterError::NotConnected) || err.indicates_device_loss(),
        "got {err:?}"
    );

    provider.attach();
    wait_until("reconnect", || master.is_connected()).await;
    assert_eq!(
        master.read_holding_registers(1, 0, 2).await.unwrap(),
        vec![7, 8]
    );
}

#[tokio::test]
async fn in_flight_request_fails_when_device_detaches() {
    let provider = Arc::new(SimProvider::new(
        SimSlave::new(1).with_holding_registers(vec![7]),
    ));
    let transport = provider.transport();
    let master = Arc::new(RtuMaster::new(
        Arc::clone(&provider) as _,
        MasterConfig::default(),
    ));
    master.connect().await.unwrap();
    transport.with_slave(|slave| slave.set_fault(SlaveFault::Silent));

    let in_flight = {
        let master = Arc::clone(&master);
        tokio::spawn(async move { master.read_holding_registers(1, 0, 1).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    provider.detach();

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.indicates_device_loss(), "got {err:?}");
    wait_until("loss to settle", || !master.is_connected()).await;
}

#[tokio::test]
async fn concurrent_requests_are_serialized() {
    let bank = register_bank(20);
    let provider = Arc::new(SimProvider::new(
        SimSlave::new(1).with_holding_registers(bank.clone()),
    ));
    let master = Arc::new(RtuMaster::new(
        Arc::clone(&provider) as _,
        MasterConfig::default(),
    ));
    master.connect().await.unwrap();

    let mut tasks = Vec::new();
    for start in 0..10u16 {
        let master = Arc::clone(&master);
        tasks.push(tokio::spawn(async move {
            master.read_holding_registers(1, start, 2).await
        }));
    }
    for (start, task) in tasks.into_iter().enumerate() {
        let values = task.await.unwrap().unwrap();
        assert_eq!(values, bank[start..start + 2]);
    }
}

#[tokio::test]
async fn disconnect_cancels_reconnect_polling() {
    let provider = Arc::new(SimProvider::new(SimSlave::new(1)));
    let config = MasterConfig::default().with_reconnect(
        ReconnectPolicy::default().with_interval(Duration::from_millis(20)),
    );
    let master = RtuMaster::new(Arc::clone(&provider) as _, config);
    master.connect().await.unwrap();

    provider.detach();
    wait_until("loss to be noticed", || !master.is_connected()).await;
    master.disconnect().await;

    // With polling stopped, re-attaching does not silently reconnect.
    provider.attach();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!master.is_connected());
}
