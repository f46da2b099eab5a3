mod common;

use ble_activity::gatt::uuid16;
use ble_activity::*;
use common::*;

const BATTERY_SERVICE: Uuid = uuid16(0x180f);
const BATTERY_LEVEL: Uuid = uuid16(0x2a19);
const DEVICE_NAME: Uuid = uuid16(0x2a00);
const CUSTOM: Uuid = uuid16(0xfff1);

#[tokio::test]
async fn discovery_reports_added_and_removed() {
    init_tracing();
    let gatt = MockGatt::new(
        vec![
            handle(BATTERY_SERVICE, BATTERY_LEVEL, 0b0001_0010),
            handle(uuid16(0x1800), DEVICE_NAME, 0b0000_0010),
        ],
        &[],
    );
    let service = Service::new(DeviceId::new("dev"), BATTERY_SERVICE, &AccessConfig::default());
    let mut events = service.events();

    let report = service
        .discover(&*gatt, LONG, &CancellationToken::new())
        .await
        .unwrap();

    // the device name lives in another service
    assert_eq!(report.retained_order, vec![BATTERY_LEVEL]);
    assert_eq!(service.characteristic(BATTERY_LEVEL).map(|h| h.uuid), Some(BATTERY_LEVEL));

    service.refresh(vec![handle(BATTERY_SERVICE, CUSTOM, 0b0000_1000)]);

    let events = drain(&mut events).await;
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], ServiceEvent::CharacteristicsAdded(added) if added.len() == 1));
    assert!(matches!(&events[1], ServiceEvent::CharacteristicsAdded(added) if added[0].uuid == CUSTOM));
    assert!(matches!(&events[2], ServiceEvent::CharacteristicsRemoved(removed) if removed[0].uuid == BATTERY_LEVEL));
    assert_eq!(service.characteristics().len(), 1);
}

#[tokio::test]
async fn cancelled_discovery_changes_nothing() {
    let gatt = MockGatt::new(vec![handle(BATTERY_SERVICE, BATTERY_LEVEL, 0b0000_0010)], &[]);
    let service = Service::new(DeviceId::new("dev"), BATTERY_SERVICE, &AccessConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service.discover(&*gatt, LONG, &cancel).await.unwrap_err();

    assert_eq!(err.kind(), error::ErrorKind::Cancelled);
    assert!(service.characteristics().is_empty());
}

#[tokio::test]
async fn slow_subscribers_keep_only_the_newest_events() {
    let config = AccessConfig {
        event_capacity: 1,
        ..Default::default()
    };
    let service = Service::new(DeviceId::new("dev"), BATTERY_SERVICE, &config);
    let mut events = service.events();

    service.refresh(vec![handle(BATTERY_SERVICE, BATTERY_LEVEL, 0b0000_0010)]);
    service.refresh(vec![handle(BATTERY_SERVICE, CUSTOM, 0b0000_1000)]);

    let events = drain(&mut events).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ServiceEvent::CharacteristicsRemoved(removed) if removed[0].uuid == BATTERY_LEVEL));
}
