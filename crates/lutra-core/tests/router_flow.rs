// End-to-end router behavior against an in-memory registry, with the
// broker and hub sides replaced by their channels.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lutra_core::{
    ButtonBinding, ChannelValue, Device, DeviceCommand, DeviceId, DeviceKind, DeviceRegistry,
    EventRouter, HubSignal, Publication, RegistrySnapshot, ZoneCommand,
};

struct Harness {
    signal_tx: mpsc::Sender<HubSignal>,
    command_tx: mpsc::Sender<DeviceCommand>,
    publish_rx: mpsc::Receiver<Publication>,
    zone_command_rx: mpsc::Receiver<ZoneCommand>,
    _cancel: CancellationToken,
}

fn sample_devices() -> Vec<Device> {
    vec![
        Device::new(
            DeviceId(2),
            "Ceiling",
            "Living Room",
            DeviceKind::Dimmer,
            vec![1],
            vec![],
        ),
        Device::new(
            DeviceId(4),
            "Lamp",
            "Den",
            DeviceKind::Switch,
            vec![9],
            vec![],
        ),
        Device::new(
            DeviceId(9),
            "Remote",
            "Living Room",
            DeviceKind::Remote,
            vec![],
            vec![ButtonBinding {
                button: 101,
                number: 0,
            }],
        ),
    ]
}

fn harness() -> Harness {
    let registry = Arc::new(DeviceRegistry::new());
    registry.install(RegistrySnapshot::from_devices(sample_devices()));

    let (signal_tx, signal_rx) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(64);
    let (publish_tx, publish_rx) = mpsc::channel(64);
    let (zone_command_tx, zone_command_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let router = EventRouter::new(registry, "lutron", publish_tx, zone_command_tx);
    tokio::spawn(router.run(signal_rx, command_rx, cancel.clone()));

    Harness {
        signal_tx,
        command_tx,
        publish_rx,
        zone_command_rx,
        _cancel: cancel,
    }
}

async fn zone_event(harness: &Harness, zone: u32, level: u8) {
    harness
        .signal_tx
        .send(HubSignal::Zone {
            zone,
            level,
            observed_at: Utc::now(),
        })
        .await
        .expect("router alive");
}

async fn next_publication(harness: &mut Harness) -> Publication {
    tokio::time::timeout(Duration::from_secs(2), harness.publish_rx.recv())
        .await
        .expect("timed out waiting for a publication")
        .expect("publish channel open")
}

#[tokio::test]
async fn hub_change_publishes_retained_state() {
    let mut harness = harness();

    zone_event(&harness, 1, 75).await;

    let publication = next_publication(&mut harness).await;
    assert_eq!(publication.topic, "lutron/living_room/ceiling/0/state");
    assert_eq!(publication.payload, "75");
    assert!(publication.retained);
}

#[tokio::test]
async fn duplicate_status_is_published_once() {
    let mut harness = harness();

    zone_event(&harness, 1, 75).await;
    zone_event(&harness, 1, 75).await; // idempotent re-delivery
    zone_event(&harness, 1, 20).await;

    assert_eq!(next_publication(&mut harness).await.payload, "75");
    // The duplicate produced nothing; the next publication is the new value.
    assert_eq!(next_publication(&mut harness).await.payload, "20");
}

#[tokio::test]
async fn switch_levels_publish_on_off() {
    let mut harness = harness();

    zone_event(&harness, 9, 100).await;
    zone_event(&harness, 9, 0).await;

    assert_eq!(next_publication(&mut harness).await.payload, "ON");
    assert_eq!(next_publication(&mut harness).await.payload, "OFF");
}

#[tokio::test]
async fn unknown_device_command_never_reaches_the_hub() {
    let mut harness = harness();

    harness
        .command_tx
        .send(DeviceCommand {
            area: "attic".into(),
            device: "ghost".into(),
            channel: 0,
            value: ChannelValue::On,
        })
        .await
        .expect("router alive");

    // A valid command sent afterwards must be the first to come out.
    harness
        .command_tx
        .send(DeviceCommand {
            area: "den".into(),
            device: "lamp".into(),
            channel: 0,
            value: ChannelValue::On,
        })
        .await
        .expect("router alive");

    let command = tokio::time::timeout(Duration::from_secs(2), harness.zone_command_rx.recv())
        .await
        .expect("timed out")
        .expect("channel open");
    assert_eq!(command.device, DeviceId(4));
    assert_eq!(command.zone, 9);
    assert_eq!(command.level, 100);
}

#[tokio::test]
async fn command_does_not_update_the_cache_until_the_hub_confirms() {
    let mut harness = harness();

    harness
        .command_tx
        .send(DeviceCommand {
            area: "living_room".into(),
            device: "ceiling".into(),
            channel: 0,
            value: ChannelValue::Level(55),
        })
        .await
        .expect("router alive");

    let command = tokio::time::timeout(Duration::from_secs(2), harness.zone_command_rx.recv())
        .await
        .expect("timed out")
        .expect("channel open");
    assert_eq!(command.zone, 1);
    assert_eq!(command.level, 55);

    // Nothing published yet: the cache only moves on hub status.
    let nothing = tokio::time::timeout(Duration::from_millis(100), harness.publish_rx.recv()).await;
    assert!(nothing.is_err(), "unexpected publication before confirmation");

    // The hub's echo drives the publish.
    zone_event(&harness, 1, 55).await;
    let publication = next_publication(&mut harness).await;
    assert_eq!(publication.payload, "55");
}

#[tokio::test]
async fn resync_republishes_every_cached_value() {
    let mut harness = harness();

    zone_event(&harness, 1, 30).await;
    zone_event(&harness, 9, 100).await;
    assert_eq!(next_publication(&mut harness).await.payload, "30");
    assert_eq!(next_publication(&mut harness).await.payload, "ON");

    harness
        .signal_tx
        .send(HubSignal::Resync)
        .await
        .expect("router alive");

    let mut payloads = vec![
        next_publication(&mut harness).await,
        next_publication(&mut harness).await,
    ];
    payloads.sort_by(|a, b| a.topic.cmp(&b.topic));
    assert_eq!(payloads[0].topic, "lutron/den/lamp/0/state");
    assert_eq!(payloads[0].payload, "ON");
    assert!(payloads[0].retained);
    assert_eq!(payloads[1].topic, "lutron/living_room/ceiling/0/state");
    assert_eq!(payloads[1].payload, "30");
}

#[tokio::test]
async fn convergence_after_reconnect() {
    // N intermediate changes happen while disconnected; only the final
    // value must come out of the post-reconnect sync + resync.
    let mut harness = harness();

    zone_event(&harness, 1, 10).await;
    assert_eq!(next_publication(&mut harness).await.payload, "10");

    // Reconnect: the status dump carries the hub's current truth (80),
    // followed by the supervisor's resync marker.
    zone_event(&harness, 1, 80).await;
    harness
        .signal_tx
        .send(HubSignal::Resync)
        .await
        .expect("router alive");

    assert_eq!(next_publication(&mut harness).await.payload, "80");
    let resynced = next_publication(&mut harness).await;
    assert_eq!(resynced.payload, "80");
    assert_eq!(resynced.topic, "lutron/living_room/ceiling/0/state");
}

#[tokio::test]
async fn button_presses_come_out_as_events() {
    use lutra_leap::ButtonAction;

    let mut harness = harness();

    harness
        .signal_tx
        .send(HubSignal::Button {
            button: 101,
            action: ButtonAction::Press,
        })
        .await
        .expect("router alive");
    harness
        .signal_tx
        .send(HubSignal::Button {
            button: 101,
            action: ButtonAction::Release,
        })
        .await
        .expect("router alive");

    let event = next_publication(&mut harness).await;
    assert_eq!(event.topic, "lutron/living_room/remote/button/0/event");
    assert_eq!(event.payload, "single_press");
    assert!(!event.retained);
}
