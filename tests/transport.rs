//! Modbus TCP transport against a live server on an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use modbus_plant_sim::server::serve_listener;
use modbus_plant_sim::{Plant, PlantRuntime, RegisterStore, Scheduler, Topology};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_modbus::client::{tcp::connect, Reader, Writer};
use tokio_modbus::prelude::ExceptionCode;

async fn start(store: RegisterStore) -> (SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(serve_listener(listener, store, stop_rx));
    (address, stop_tx)
}

#[tokio::test]
async fn test_read_and_write_holding_registers() {
    let store = RegisterStore::new(500);
    store.set(100, &[11, 22, 33]).unwrap();
    let (address, stop) = start(store.clone()).await;

    let mut ctx = connect(address).await.unwrap();
    let values = ctx.read_holding_registers(100, 3).await.unwrap().unwrap();
    assert_eq!(values, vec![11, 22, 33]);

    ctx.write_single_register(200, 0x1234).await.unwrap().unwrap();
    ctx.write_multiple_registers(300, &[1, 2, 3, 4])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.get(200, 1).unwrap(), vec![0x1234]);
    assert_eq!(store.get(300, 4).unwrap(), vec![1, 2, 3, 4]);

    let values = ctx
        .read_write_multiple_registers(300, 2, 301, &[9])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(values, vec![1, 9]);

    stop.send_replace(true);
}

#[tokio::test]
async fn test_exceptions() {
    let store = RegisterStore::new(500);
    let (address, stop) = start(store).await;
    let mut ctx = connect(address).await.unwrap();

    let res = ctx.read_holding_registers(495, 10).await.unwrap();
    assert_eq!(res, Err(ExceptionCode::IllegalDataAddress));

    let res = ctx.read_holding_registers(0, 126).await.unwrap();
    assert_eq!(res, Err(ExceptionCode::IllegalDataValue));

    let res = ctx.read_input_registers(0, 1).await.unwrap();
    assert_eq!(res, Err(ExceptionCode::IllegalFunction));

    stop.send_replace(true);
}

#[tokio::test]
async fn test_client_drives_simulated_valve() {
    let topology =
        Topology::load_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/topology")).unwrap();
    let store = RegisterStore::new(1000);
    let plant = Plant::build(&topology, &store).unwrap();
    let mut runtime = PlantRuntime::new(plant, store.clone());
    let valve = runtime.find("WTP", "WTP_Drain_Valve").unwrap();
    runtime.enable_simulation(valve).unwrap();
    let status = runtime.device(valve).unwrap().address();

    let (address, stop) = start(store).await;
    let scheduler = Scheduler::new(runtime.into_shared(), Duration::from_millis(10));
    tokio::spawn(scheduler.run(stop.subscribe()));

    let mut ctx = connect(address).await.unwrap();
    // control vector sits two registers after status0
    ctx.write_single_register(status + 2, 0b1)
        .await
        .unwrap()
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let values = ctx.read_holding_registers(status, 1).await.unwrap().unwrap();
    assert_eq!(values[0] & 0b11, 0b10, "valve reports open");

    stop.send_replace(true);
}
