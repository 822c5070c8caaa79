use std::sync::Arc;

use cancore_common::config::PdoConfig;
use cancore_common::constants::pdo_comm_subs;
use integration_tests::prelude::*;

fn device(node_id: u8) -> MemoryStorage {
    let storage = MemoryStorage::new(
        node_id,
        DeviceInfo {
            rx_pdo_count: 1,
            tx_pdo_count: 1,
        },
    );
    storage.add_u16(0x6000, 1, 0);
    storage.add_u8(0x6200, 1, 0);
    storage.add_device_tpdo(0, 0x180, 0xFF, &[0x6000_0110]);
    storage.set_adds_node_id(0x1800, pdo_comm_subs::COB_ID);
    storage.add_device_rpdo(0, 0x200, 0xFF, &[0x6200_0108]);
    storage.set_adds_node_id(0x1400, pdo_comm_subs::COB_ID);
    storage
}

fn config() -> PdoConfig {
    PdoConfig {
        buffer_timeout_ms: 50,
        ..Default::default()
    }
}

#[test]
fn test_mapper_waits_for_layer_below() {
    let _ = env_logger::try_init();
    let bus = SimBus::new();
    let storage = Arc::new(device(5));
    let mapper = Arc::new(PdoMapper::with_config(
        bus.new_interface(),
        storage.clone(),
        config(),
    ));
    let log = CallLog::new();
    let nmt = RecordingLayer::new("nmt", &log);
    let stack = LayerStack::new("node5");
    stack.add(nmt.clone());
    stack.add(mapper.clone());

    nmt.fail_on("init", Severity::Error);
    let status = LayerStatus::new();
    stack.init(&status);
    assert_eq!(Severity::Error, status.severity());
    assert_eq!("nmt.init", log.take());
    assert_eq!(0, stack.boundary());
    assert!(mapper.rpdos().is_empty());

    // Nothing below the boundary, so nothing is read
    let status = LayerStatus::new();
    stack.read(&status);
    assert_eq!("", log.take());

    nmt.clear_failures();
    let status = LayerStatus::new();
    stack.init(&status);
    assert!(status.is_ok(), "{}", status.reason());
    assert_eq!(2, stack.boundary());
    assert_eq!(1, mapper.rpdos().len());
    assert_eq!(1, mapper.tpdos().len());

    let status = LayerStatus::new();
    stack.shutdown(&status);
    assert_eq!("nmt.init nmt.shutdown", log.take());
    assert!(mapper.rpdos().is_empty());
    assert!(!storage.is_mapped(0x6000, 1));
}

#[test]
fn test_failed_read_halts_mapper_until_recover() {
    let _ = env_logger::try_init();
    let bus = SimBus::new();
    let rx = bus.new_receiver();
    let storage = Arc::new(device(5));
    let mapper = Arc::new(PdoMapper::with_config(
        bus.new_interface(),
        storage.clone(),
        config(),
    ));
    let log = CallLog::new();
    let app = RecordingLayer::new("app", &log);
    let stack = LayerStack::new("node5");
    stack.add(mapper.clone());
    stack.add(app.clone());

    let status = LayerStatus::new();
    stack.init(&status);
    assert!(status.is_ok());
    log.take();

    app.fail_on("read", Severity::Error);
    let status = LayerStatus::new();
    stack.read(&status);
    assert_eq!(Severity::Error, status.severity());
    assert_eq!("app.read app.halt", log.take());

    // The mapper is halted too, so changed data is held back
    storage.set_u8(ObjectKey::new(0x6200, 1), 9).unwrap();
    let status = LayerStatus::new();
    stack.write(&status);
    assert!(rx.drain().is_empty());

    app.clear_failures();
    let status = LayerStatus::new();
    stack.recover(&status);
    assert!(status.is_ok());
    stack.write(&status);
    let frames = rx.drain();
    assert_eq!(1, frames.len());
    assert_eq!(CanId::std(0x205), frames[0].id());
    assert_eq!(&[9], frames[0].data());
}

#[test]
fn test_group_of_devices() {
    let _ = env_logger::try_init();
    let bus = SimBus::new();
    let iface = bus.new_interface();
    let node5 = Arc::new(device(5));
    let node6 = Arc::new(device(6));

    let group: LayerGroup<PdoMapper> = LayerGroup::new("pdos");
    group.add(Arc::new(PdoMapper::with_config(
        iface.clone(),
        node5.clone(),
        config(),
    )));
    group.add(Arc::new(PdoMapper::with_config(
        iface.clone(),
        node6.clone(),
        config(),
    )));

    let status = LayerStatus::new();
    group.init(&status);
    assert!(status.is_ok(), "{}", status.reason());
    assert_eq!(2, iface.dispatcher().listener_count());

    bus.inject(CanMessage::new(CanId::std(0x185), &[5, 0]));
    bus.inject(CanMessage::new(CanId::std(0x186), &[6, 0]));
    assert_eq!(5, node5.get_u16(ObjectKey::new(0x6000, 1)).unwrap());
    assert_eq!(6, node6.get_u16(ObjectKey::new(0x6000, 1)).unwrap());

    let mut report = LayerReport::new();
    group.diag(&mut report);
    let node_ids: Vec<&str> = report
        .values()
        .iter()
        .filter(|(k, _)| k == "node_id")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(vec!["5", "6"], node_ids);

    group.shutdown(&status);
    assert_eq!(0, iface.dispatcher().listener_count());
}

#[test]
fn test_group_init_failure_rolls_back_every_device() {
    let _ = env_logger::try_init();
    let bus = SimBus::new();
    let iface = bus.new_interface();
    let good = Arc::new(device(5));
    let bad = device(6);
    // 10 bytes mapped
    bad.add_device_tpdo(0, 0x180, 0xFF, &[0x6000_0110; 5]);
    let bad = Arc::new(bad);

    let group: LayerGroup<PdoMapper> = LayerGroup::new("pdos");
    group.add(Arc::new(PdoMapper::with_config(
        iface.clone(),
        good.clone(),
        config(),
    )));
    group.add(Arc::new(PdoMapper::with_config(
        iface.clone(),
        bad.clone(),
        config(),
    )));

    let status = LayerStatus::new();
    group.init(&status);
    assert_eq!(Severity::Error, status.severity());
    // The healthy device was mapped and then shut down again
    assert!(!good.is_mapped(0x6000, 1));
    assert_eq!(0, iface.dispatcher().listener_count());
}
