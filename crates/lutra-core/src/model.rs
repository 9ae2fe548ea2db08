// ── Domain model ──
//
// Typed views over what the LEAP enumeration returns, plus the canonical
// channel value encoding shared by the state cache and the MQTT surface.

use chrono::{DateTime, Utc};

use lutra_leap::ButtonAction;

// ── Identifiers ──────────────────────────────────────────────────────

/// Stable hub-assigned device identifier (from the `/device/N` href).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Devices ──────────────────────────────────────────────────────────

/// What a device is, derived from the LEAP `DeviceType` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Switch,
    Dimmer,
    Shade,
    Remote,
    Sensor,
    Unknown,
}

impl DeviceKind {
    pub fn from_leap_type(device_type: &str) -> Self {
        match device_type {
            "WallDimmer" | "PlugInDimmer" => Self::Dimmer,
            "WallSwitch" | "PlugInSwitch" => Self::Switch,
            t if t.contains("Shade") => Self::Shade,
            t if t.starts_with("Pico") => Self::Remote,
            t if t.contains("Sensor") => Self::Sensor,
            _ => Self::Unknown,
        }
    }
}

/// A button on a Pico remote: hub-side id plus the 0-based position the
/// MQTT surface uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonBinding {
    pub button: u32,
    pub number: u8,
}

/// One enumerated device. Immutable between registry loads.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub area: String,
    pub kind: DeviceKind,
    /// Topic-safe area label.
    pub area_slug: String,
    /// Topic-safe device label.
    pub name_slug: String,
    /// Controllable zones; the index into this list is the channel number.
    pub channels: Vec<u32>,
    /// Buttons, for remotes.
    pub buttons: Vec<ButtonBinding>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        area: impl Into<String>,
        kind: DeviceKind,
        channels: Vec<u32>,
        buttons: Vec<ButtonBinding>,
    ) -> Self {
        let name = name.into();
        let area = area.into();
        let mut area_slug = slugify(&area);
        if area_slug.is_empty() {
            area_slug = "unassigned".into();
        }
        let mut name_slug = slugify(&name);
        if name_slug.is_empty() {
            name_slug = format!("device_{id}");
        }
        Self {
            id,
            name,
            area,
            kind,
            area_slug,
            name_slug,
            channels,
            buttons,
        }
    }
}

/// Lowercase, alphanumerics kept, everything else folded to `_`.
pub fn slugify(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ── Channel values ───────────────────────────────────────────────────

/// Canonical value of one channel. `Level` covers dimmer brightness and
/// shade position alike (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelValue {
    On,
    Off,
    Level(u8),
}

impl ChannelValue {
    /// MQTT payload encoding: `ON`, `OFF`, or a bare integer.
    pub fn encode(self) -> String {
        match self {
            Self::On => "ON".into(),
            Self::Off => "OFF".into(),
            Self::Level(level) => level.to_string(),
        }
    }

    /// Parse an MQTT payload. Total: anything unrecognized is `None`.
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if payload.eq_ignore_ascii_case("ON") {
            return Some(Self::On);
        }
        if payload.eq_ignore_ascii_case("OFF") {
            return Some(Self::Off);
        }
        match payload.parse::<u8>() {
            Ok(level) if level <= 100 => Some(Self::Level(level)),
            _ => None,
        }
    }

    /// Interpret a hub-reported zone level for a given device kind.
    /// Switches are boolean; everything else keeps the raw level.
    pub fn from_zone_level(level: u8, kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Switch => {
                if level > 0 {
                    Self::On
                } else {
                    Self::Off
                }
            }
            _ => Self::Level(level.min(100)),
        }
    }

    /// The zone level a `GoToLevel` command should carry for this value.
    pub fn as_zone_level(self) -> u8 {
        match self {
            Self::On => 100,
            Self::Off => 0,
            Self::Level(level) => level.min(100),
        }
    }
}

// ── Router inputs ────────────────────────────────────────────────────

/// Everything the hub side feeds into the event router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubSignal {
    /// A zone reached a new level -- hub push and command echo alike.
    Zone {
        zone: u32,
        level: u8,
        observed_at: DateTime<Utc>,
    },
    /// A raw Pico button transition.
    Button { button: u32, action: ButtonAction },
    /// Supervisor marker: republish all cached state (post-reconnect).
    Resync,
}

/// A command parsed off the broker's `.../set` topic tree. Labels are
/// topic slugs; the router resolves them against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub area: String,
    pub device: String,
    pub channel: u8,
    pub value: ChannelValue,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slugify_folds_labels() {
        assert_eq!(slugify("Living Room"), "living_room");
        assert_eq!(slugify("Kids' Bedroom 2"), "kids__bedroom_2");
        assert_eq!(slugify("Küche"), "küche");
    }

    #[test]
    fn device_slugs_never_end_up_empty() {
        let device = Device::new(DeviceId(7), "???", "", DeviceKind::Dimmer, vec![1], vec![]);
        assert_eq!(device.area_slug, "unassigned");
        assert_eq!(device.name_slug, "device_7");
    }

    #[test]
    fn kind_mapping_covers_known_types() {
        assert_eq!(DeviceKind::from_leap_type("WallDimmer"), DeviceKind::Dimmer);
        assert_eq!(DeviceKind::from_leap_type("WallSwitch"), DeviceKind::Switch);
        assert_eq!(
            DeviceKind::from_leap_type("SerenaRollerShade"),
            DeviceKind::Shade
        );
        assert_eq!(
            DeviceKind::from_leap_type("Pico3ButtonRaiseLower"),
            DeviceKind::Remote
        );
        assert_eq!(
            DeviceKind::from_leap_type("RPSOccupancySensor"),
            DeviceKind::Sensor
        );
        assert_eq!(DeviceKind::from_leap_type("SmartBridge"), DeviceKind::Unknown);
    }

    #[test]
    fn value_encode_parse_is_canonical() {
        assert_eq!(ChannelValue::On.encode(), "ON");
        assert_eq!(ChannelValue::Off.encode(), "OFF");
        assert_eq!(ChannelValue::Level(42).encode(), "42");

        assert_eq!(ChannelValue::parse("ON"), Some(ChannelValue::On));
        assert_eq!(ChannelValue::parse("off"), Some(ChannelValue::Off));
        assert_eq!(ChannelValue::parse(" 42 "), Some(ChannelValue::Level(42)));
        assert_eq!(ChannelValue::parse("101"), None);
        assert_eq!(ChannelValue::parse("-3"), None);
        assert_eq!(ChannelValue::parse("bright"), None);
        assert_eq!(ChannelValue::parse(""), None);
    }

    #[test]
    fn switch_levels_collapse_to_boolean() {
        assert_eq!(
            ChannelValue::from_zone_level(100, DeviceKind::Switch),
            ChannelValue::On
        );
        assert_eq!(
            ChannelValue::from_zone_level(0, DeviceKind::Switch),
            ChannelValue::Off
        );
        assert_eq!(
            ChannelValue::from_zone_level(60, DeviceKind::Dimmer),
            ChannelValue::Level(60)
        );
        assert_eq!(
            ChannelValue::from_zone_level(255, DeviceKind::Shade),
            ChannelValue::Level(100)
        );
    }

    #[test]
    fn command_levels_map_to_zone_levels() {
        assert_eq!(ChannelValue::On.as_zone_level(), 100);
        assert_eq!(ChannelValue::Off.as_zone_level(), 0);
        assert_eq!(ChannelValue::Level(30).as_zone_level(), 30);
    }
}
