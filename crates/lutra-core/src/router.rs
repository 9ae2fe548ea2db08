// ── Event router ──
//
// The single sequential consumer of both inbound streams, and the only
// component that mutates the state cache. Interleaving across the two
// streams is unspecified; within each stream processing is strictly
// FIFO, and one event is fully handled before the next is taken, so
// cancellation can never abandon a half-applied mutation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broker::Publication;
use crate::buttons::ButtonTracker;
use crate::cache::{Applied, StateCache};
use crate::commands::ZoneCommand;
use crate::model::{ChannelValue, Device, DeviceCommand, HubSignal};
use crate::registry::DeviceRegistry;
use crate::topics;

pub struct EventRouter {
    registry: Arc<DeviceRegistry>,
    cache: StateCache,
    topic_prefix: String,
    publish_tx: mpsc::Sender<Publication>,
    zone_command_tx: mpsc::Sender<ZoneCommand>,
    buttons: ButtonTracker,
}

impl EventRouter {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        topic_prefix: impl Into<String>,
        publish_tx: mpsc::Sender<Publication>,
        zone_command_tx: mpsc::Sender<ZoneCommand>,
    ) -> Self {
        let topic_prefix = topic_prefix.into();
        let buttons = ButtonTracker::new(topic_prefix.clone(), publish_tx.clone());
        Self {
            registry,
            cache: StateCache::new(),
            topic_prefix,
            publish_tx,
            zone_command_tx,
            buttons,
        }
    }

    /// Consume both streams until cancellation or both senders are gone.
    pub async fn run(
        mut self,
        mut hub_rx: mpsc::Receiver<HubSignal>,
        mut command_rx: mpsc::Receiver<DeviceCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                signal = hub_rx.recv() => match signal {
                    Some(signal) => self.on_hub_signal(signal).await,
                    None => break,
                },
                command = command_rx.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }
        debug!("event router stopped");
    }

    // ── Hub side ─────────────────────────────────────────────────────

    async fn on_hub_signal(&mut self, signal: HubSignal) {
        match signal {
            HubSignal::Zone {
                zone,
                level,
                observed_at,
            } => {
                let Some((device, channel)) = self.registry.snapshot().zone_target(zone) else {
                    debug!(zone, "status for unmapped zone dropped");
                    return;
                };
                let value = ChannelValue::from_zone_level(level, device.kind);
                match self.cache.apply(device.id, channel, value, observed_at) {
                    Applied::Changed { previous } => {
                        debug!(
                            device = %device.id,
                            channel,
                            value = %value.encode(),
                            previous = ?previous.map(ChannelValue::encode),
                            "channel changed"
                        );
                        self.publish_state(&device, channel, value).await;
                    }
                    Applied::Unchanged => {
                        trace!(device = %device.id, channel, "duplicate status ignored");
                    }
                }
            }
            HubSignal::Button { button, action } => {
                let Some((device, number)) = self.registry.snapshot().button_target(button)
                else {
                    debug!(button, "event for unmapped button dropped");
                    return;
                };
                self.buttons.record(&device, number, action);
            }
            HubSignal::Resync => self.resync().await,
        }
    }

    /// Republish every cached value, retained. Triggered by the
    /// supervisor after the hub returns to Ready so broker subscribers
    /// converge on the latest state without a replay of history.
    async fn resync(&mut self) {
        self.cache.force_refresh_all();
        let due = self.cache.take_due();
        info!(entries = due.len(), "republishing cached state");

        let snapshot = self.registry.snapshot();
        for (device_id, channel, value) in due {
            let Some(device) = snapshot.device(device_id) else {
                // The device vanished from the rebuilt registry; its
                // cached entry ages out with the next load.
                continue;
            };
            self.publish_state(&device, channel, value).await;
        }
    }

    async fn publish_state(&self, device: &Arc<Device>, channel: u8, value: ChannelValue) {
        let publication = Publication::retained(
            topics::state_topic(&self.topic_prefix, device, channel),
            value.encode(),
        );
        if self.publish_tx.send(publication).await.is_err() {
            debug!("broker publication channel closed");
        }
    }

    // ── Broker side ──────────────────────────────────────────────────

    async fn on_command(&mut self, command: DeviceCommand) {
        let snapshot = self.registry.snapshot();
        let Some(device) = snapshot.resolve(&command.area, &command.device) else {
            warn!(
                area = %command.area,
                device = %command.device,
                "command for unknown device dropped"
            );
            return;
        };
        let Some(zone) = device.channels.get(usize::from(command.channel)).copied() else {
            warn!(
                device = %device.id,
                channel = command.channel,
                "command for unknown channel dropped"
            );
            return;
        };

        // No optimistic cache update: the hub is ground truth, and the
        // cache only moves on its status reports.
        let zone_command = ZoneCommand {
            zone,
            level: command.value.as_zone_level(),
            device: device.id,
            channel: command.channel,
        };
        if self.zone_command_tx.send(zone_command).await.is_err() {
            debug!("command dispatcher channel closed");
        }
    }
}
