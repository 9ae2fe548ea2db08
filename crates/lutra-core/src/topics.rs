// ── MQTT topic layout ──
//
// The documented, stable topic convention:
//
//   <prefix>/<area>/<device>/<channel>/state            retained state
//   <prefix>/<area>/<device>/<channel>/set              inbound commands
//   <prefix>/<area>/<device>/button/<n>/event           Pico button events
//   <prefix>/bridge/status                              online/offline
//
// Parsing is a pure, total function: any topic or payload that does not
// fit yields a MalformedCommand, never a panic or a fatal error.

use crate::error::BridgeError;
use crate::model::{ChannelValue, Device, DeviceCommand};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

// ── Topic construction ───────────────────────────────────────────────

pub fn state_topic(prefix: &str, device: &Device, channel: u8) -> String {
    format!(
        "{prefix}/{}/{}/{channel}/state",
        device.area_slug, device.name_slug
    )
}

pub fn button_event_topic(prefix: &str, device: &Device, number: u8) -> String {
    format!(
        "{prefix}/{}/{}/button/{number}/event",
        device.area_slug, device.name_slug
    )
}

pub fn availability_topic(prefix: &str) -> String {
    format!("{prefix}/bridge/status")
}

/// Subscription filter covering the whole command tree.
pub fn command_filter(prefix: &str) -> String {
    format!("{prefix}/+/+/+/set")
}

// ── Command parsing ──────────────────────────────────────────────────

fn malformed(topic: &str, reason: impl Into<String>) -> BridgeError {
    BridgeError::MalformedCommand {
        topic: topic.to_owned(),
        reason: reason.into(),
    }
}

/// Map an inbound publish to a [`DeviceCommand`].
///
/// Deterministic and side-effect free; device resolution against the
/// registry happens later, in the router.
pub fn parse_command(prefix: &str, topic: &str, payload: &[u8]) -> Result<DeviceCommand, BridgeError> {
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| malformed(topic, "outside the configured prefix"))?;

    let segments: Vec<&str> = rest.split('/').collect();
    let [area, device, channel, verb] = segments[..] else {
        return Err(malformed(topic, "expected <area>/<device>/<channel>/set"));
    };
    if verb != "set" {
        return Err(malformed(topic, "not a command topic"));
    }
    if area.is_empty() || device.is_empty() {
        return Err(malformed(topic, "empty area or device segment"));
    }

    let channel: u8 = channel
        .parse()
        .map_err(|_| malformed(topic, format!("bad channel index {channel:?}")))?;

    let payload = std::str::from_utf8(payload)
        .map_err(|_| malformed(topic, "payload is not UTF-8"))?;
    let value = ChannelValue::parse(payload)
        .ok_or_else(|| malformed(topic, format!("unrecognized payload {payload:?}")))?;

    Ok(DeviceCommand {
        area: area.to_owned(),
        device: device.to_owned(),
        channel,
        value,
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceId, DeviceKind};
    use pretty_assertions::assert_eq;

    fn dimmer() -> Device {
        Device::new(
            DeviceId(2),
            "Ceiling",
            "Living Room",
            DeviceKind::Dimmer,
            vec![1],
            vec![],
        )
    }

    #[test]
    fn topics_use_slugged_labels() {
        let device = dimmer();
        assert_eq!(
            state_topic("lutron", &device, 0),
            "lutron/living_room/ceiling/0/state"
        );
        assert_eq!(
            button_event_topic("lutron", &device, 2),
            "lutron/living_room/ceiling/button/2/event"
        );
        assert_eq!(availability_topic("lutron"), "lutron/bridge/status");
        assert_eq!(command_filter("lutron"), "lutron/+/+/+/set");
    }

    #[test]
    fn parse_accepts_well_formed_commands() {
        let command =
            parse_command("lutron", "lutron/living_room/ceiling/0/set", b"ON").unwrap();
        assert_eq!(
            command,
            DeviceCommand {
                area: "living_room".into(),
                device: "ceiling".into(),
                channel: 0,
                value: ChannelValue::On,
            }
        );

        let command =
            parse_command("lutron", "lutron/den/shade/1/set", b"45").unwrap();
        assert_eq!(command.value, ChannelValue::Level(45));
        assert_eq!(command.channel, 1);
    }

    #[test]
    fn parse_rejects_foreign_prefixes() {
        assert!(parse_command("lutron", "zigbee2mqtt/den/shade/0/set", b"ON").is_err());
        // Prefix must be followed by a separator, not merely be a prefix
        // of the first segment.
        assert!(parse_command("lutron", "lutronx/den/shade/0/set", b"ON").is_err());
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        let cases: &[&str] = &[
            "lutron/den/shade/set",          // missing channel
            "lutron/den/shade/0/get",        // wrong verb
            "lutron/den/shade/0/set/extra",  // trailing segment
            "lutron//shade/0/set",           // empty area
            "lutron/den/shade/abc/set",      // non-numeric channel
            "lutron/den/shade/300/set",      // channel out of u8 range
        ];
        for topic in cases {
            assert!(
                parse_command("lutron", topic, b"ON").is_err(),
                "expected {topic} to be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_bad_payloads() {
        let topic = "lutron/den/shade/0/set";
        assert!(parse_command("lutron", topic, b"").is_err());
        assert!(parse_command("lutron", topic, b"120").is_err());
        assert!(parse_command("lutron", topic, b"maybe").is_err());
        assert!(parse_command("lutron", topic, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn malformed_errors_carry_the_topic() {
        let err = parse_command("lutron", "lutron/den/shade/0/get", b"ON").unwrap_err();
        assert!(err.to_string().contains("lutron/den/shade/0/get"));
    }
}
