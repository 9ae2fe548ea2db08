// ── Device registry ──
//
// Static-per-session mapping of device identity to metadata, rebuilt as
// a whole on every hub (re)connect. Snapshots swap atomically: a reader
// holding the old `Arc` keeps a consistent view, and a failed load
// leaves the previous snapshot authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use lutra_leap::LeapClient;
use lutra_leap::protocol::{self, DeviceDefinition};

use crate::error::BridgeError;
use crate::model::{ButtonBinding, Device, DeviceId, DeviceKind};

// ── Snapshot ─────────────────────────────────────────────────────────

/// An immutable, fully indexed view of one device enumeration.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    devices: HashMap<DeviceId, Arc<Device>>,
    /// zone id -> (device, channel index)
    zone_index: HashMap<u32, (DeviceId, u8)>,
    /// (area slug, name slug) -> device
    topic_index: HashMap<(String, String), DeviceId>,
    /// button id -> (remote device, button number)
    button_index: HashMap<u32, (DeviceId, u8)>,
}

impl RegistrySnapshot {
    pub fn from_devices(devices: Vec<Device>) -> Self {
        let mut snapshot = Self::default();
        for device in devices {
            let device = Arc::new(device);

            for (channel, zone) in device.channels.iter().enumerate() {
                snapshot
                    .zone_index
                    .insert(*zone, (device.id, channel as u8));
            }
            for binding in &device.buttons {
                snapshot
                    .button_index
                    .insert(binding.button, (device.id, binding.number));
            }

            let key = (device.area_slug.clone(), device.name_slug.clone());
            if let Some(previous) = snapshot.topic_index.insert(key, device.id) {
                warn!(
                    area = %device.area_slug,
                    name = %device.name_slug,
                    previous = %previous,
                    replacement = %device.id,
                    "duplicate topic labels; later device wins"
                );
            }

            snapshot.devices.insert(device.id, device);
        }
        snapshot
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.get(&id).cloned()
    }

    /// Resolve a zone status to the owning device and channel.
    pub fn zone_target(&self, zone: u32) -> Option<(Arc<Device>, u8)> {
        let (device, channel) = self.zone_index.get(&zone)?;
        Some((self.devices.get(device)?.clone(), *channel))
    }

    /// Resolve topic slugs from an inbound command.
    pub fn resolve(&self, area: &str, name: &str) -> Option<Arc<Device>> {
        let id = self.topic_index.get(&(area.to_owned(), name.to_owned()))?;
        self.devices.get(id).cloned()
    }

    /// Resolve a button event to the owning remote and button number.
    pub fn button_target(&self, button: u32) -> Option<(Arc<Device>, u8)> {
        let (device, number) = self.button_index.get(&button)?;
        Some((self.devices.get(device)?.clone(), *number))
    }

    /// All button ids, for (re)subscribing after connect.
    pub fn button_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.button_index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Holder of the active snapshot. `load` replaces it atomically;
/// `snapshot` is a wait-free read.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    active: ArcSwap<RegistrySnapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Lookups against the returned `Arc` stay
    /// consistent even if a `load` swaps in a newer one meanwhile.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.active.load_full()
    }

    /// Install a prebuilt snapshot (used by `load` and by tests).
    pub fn install(&self, snapshot: RegistrySnapshot) {
        self.active.store(Arc::new(snapshot));
    }

    /// Enumerate devices against the hub and swap in a complete snapshot.
    ///
    /// Fails without publishing anything partial; the retry rides the
    /// hub reconnect sequence.
    pub async fn load(&self, client: &LeapClient) -> Result<usize, BridgeError> {
        let definitions = client.devices().await.map_err(load_error)?;

        let mut devices = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            match device_from_definition(client, definition).await? {
                Some(device) => devices.push(device),
                None => debug!(href = %definition.href, "skipping unidentifiable device"),
            }
        }

        let snapshot = RegistrySnapshot::from_devices(devices);
        let count = snapshot.device_count();
        self.install(snapshot);
        Ok(count)
    }
}

async fn device_from_definition(
    client: &LeapClient,
    definition: &DeviceDefinition,
) -> Result<Option<Device>, BridgeError> {
    let Some(id) = definition.id() else {
        return Ok(None);
    };

    // FullyQualifiedName is the area path plus the device name; the
    // head is the area label. Devices directly on the bridge have a
    // bare name and land in the "unassigned" area.
    let area = if definition.fully_qualified_name.len() >= 2 {
        definition.fully_qualified_name[0].clone()
    } else {
        String::new()
    };

    let channels: Vec<u32> = definition
        .local_zones
        .iter()
        .filter_map(|zone| protocol::href_id(&zone.href))
        .collect();

    let mut buttons = Vec::new();
    for group in &definition.button_groups {
        let Some(group_id) = protocol::href_id(&group.href) else {
            continue;
        };
        let group = client.button_group(group_id).await.map_err(load_error)?;
        for button in &group.buttons {
            if let Some(button_id) = button.id() {
                buttons.push(ButtonBinding {
                    button: button_id,
                    number: button.button_number,
                });
            }
        }
    }

    Ok(Some(Device::new(
        DeviceId(id),
        definition.name.clone(),
        area,
        DeviceKind::from_leap_type(&definition.device_type),
        channels,
        buttons,
    )))
}

fn load_error(err: lutra_leap::LeapError) -> BridgeError {
    BridgeError::RegistryLoad {
        reason: err.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
