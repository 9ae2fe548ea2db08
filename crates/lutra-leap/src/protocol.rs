//! LEAP wire protocol: message envelope and typed bodies.
//!
//! Every LEAP message is a single JSON object on its own line with the
//! shape `{ "CommuniqueType": ..., "Header": {...}, "Body": {...} }`.
//! Responses echo the request's `ClientTag`; unsolicited notifications
//! carry no tag and are identified by `MessageBodyType`.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::LeapError;

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LeapMessage {
    #[serde(rename = "CommuniqueType", default)]
    pub communique_type: String,
    #[serde(rename = "Header")]
    pub header: LeapHeader,
    #[serde(rename = "Body", default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeapHeader {
    #[serde(rename = "StatusCode", default)]
    pub status_code: Option<String>,
    #[serde(rename = "Url", default)]
    pub url: Option<String>,
    #[serde(rename = "ClientTag", default)]
    pub client_tag: Option<String>,
    #[serde(rename = "MessageBodyType", default)]
    pub message_body_type: Option<String>,
}

impl LeapMessage {
    /// Responses carry an HTTP-style status line, e.g. `"200 OK"` or
    /// `"201 Created"`. Notifications carry none, which counts as success.
    pub fn status_is_success(&self) -> bool {
        match self.header.status_code.as_deref() {
            Some(status) => status.starts_with('2'),
            None => true,
        }
    }

    /// Decode a named field of the body into a typed value.
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self, field: &str) -> Result<T, LeapError> {
        let value = self
            .body
            .as_ref()
            .and_then(|body| body.get(field))
            .ok_or_else(|| LeapError::Protocol {
                message: format!("response body missing {field}"),
            })?;
        serde_json::from_value(value.clone()).map_err(|e| LeapError::Protocol {
            message: format!("undecodable {field}: {e}"),
        })
    }
}

/// Encode a request line. `tag` correlates the eventual response.
pub(crate) fn encode_request(
    communique: &str,
    url: &str,
    tag: u64,
    body: Option<Value>,
) -> String {
    let mut message = json!({
        "CommuniqueType": communique,
        "Header": { "Url": url, "ClientTag": tag.to_string() },
    });
    if let Some(body) = body {
        message["Body"] = body;
    }
    message.to_string()
}

/// Extract the trailing numeric id from an href like `/zone/7`.
pub fn href_id(href: &str) -> Option<u32> {
    href.rsplit('/').next()?.parse().ok()
}

// ── Typed bodies ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Href {
    pub href: String,
}

/// One entry of a `MultipleDeviceDefinition` body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDefinition {
    pub href: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Area path plus device name, e.g. `["Living Room", "Ceiling"]`.
    #[serde(rename = "FullyQualifiedName", default)]
    pub fully_qualified_name: Vec<String>,
    #[serde(rename = "DeviceType", default)]
    pub device_type: String,
    #[serde(rename = "LocalZones", default)]
    pub local_zones: Vec<Href>,
    #[serde(rename = "ButtonGroups", default)]
    pub button_groups: Vec<Href>,
}

impl DeviceDefinition {
    pub fn id(&self) -> Option<u32> {
        href_id(&self.href)
    }
}

/// `OneButtonGroupDefinition` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonGroupDefinition {
    pub href: String,
    #[serde(rename = "Buttons", default)]
    pub buttons: Vec<ButtonDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonDefinition {
    pub href: String,
    #[serde(rename = "ButtonNumber", default)]
    pub button_number: u8,
}

impl ButtonDefinition {
    pub fn id(&self) -> Option<u32> {
        href_id(&self.href)
    }
}

/// A `ZoneStatus` body. Dimmers and shades report `Level` (0-100),
/// switches report `SwitchedLevel` (`"On"`/`"Off"`).
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneStatusBody {
    #[serde(rename = "Zone")]
    pub zone: Href,
    #[serde(rename = "Level", default)]
    pub level: Option<u8>,
    #[serde(rename = "SwitchedLevel", default)]
    pub switched_level: Option<String>,
}

impl ZoneStatusBody {
    /// Collapse the two reporting styles into a single 0-100 level.
    pub fn effective_level(&self) -> Option<u8> {
        if let Some(level) = self.level {
            return Some(level.min(100));
        }
        match self.switched_level.as_deref() {
            Some("On") => Some(100),
            Some("Off") => Some(0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonStatusBody {
    #[serde(rename = "Button")]
    pub button: Href,
    #[serde(rename = "ButtonEvent")]
    pub button_event: ButtonEventBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonEventBody {
    #[serde(rename = "EventType", default)]
    pub event_type: String,
}

// ── Notifications ────────────────────────────────────────────────────

/// A raw button transition as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Press,
    Release,
}

impl ButtonAction {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "Press" => Some(Self::Press),
            "Release" => Some(Self::Release),
            _ => None,
        }
    }
}

/// An unsolicited push from the bridge, already narrowed to the message
/// types the bridge session cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeapNotification {
    /// A zone reached a new level (hub push or command echo alike).
    ZoneStatus { zone: u32, level: u8 },
    /// A Pico button was pressed or released.
    Button { button: u32, action: ButtonAction },
}

/// Map an untagged message to a notification, if it is one we understand.
///
/// Unknown body types return `None` -- the bridge emits plenty of status
/// traffic (occupancy, ping responses to other clients) we ignore.
pub(crate) fn notification_from_message(message: &LeapMessage) -> Option<LeapNotification> {
    match message.header.message_body_type.as_deref() {
        Some("OneZoneStatus") => {
            let status: ZoneStatusBody = message.decode_body("ZoneStatus").ok()?;
            let zone = href_id(&status.zone.href)?;
            let level = status.effective_level()?;
            Some(LeapNotification::ZoneStatus { zone, level })
        }
        Some("OneButtonStatusEvent") => {
            let status: ButtonStatusBody = message.decode_body("ButtonStatus").ok()?;
            let button = href_id(&status.button.href)?;
            let action = ButtonAction::from_event_type(&status.button_event.event_type)?;
            Some(LeapNotification::Button { button, action })
        }
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_request_carries_tag_and_url() {
        let line = encode_request("ReadRequest", "/device", 42, None);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["CommuniqueType"], "ReadRequest");
        assert_eq!(parsed["Header"]["Url"], "/device");
        assert_eq!(parsed["Header"]["ClientTag"], "42");
        assert!(parsed.get("Body").is_none());
    }

    #[test]
    fn href_id_parses_trailing_segment() {
        assert_eq!(href_id("/zone/7"), Some(7));
        assert_eq!(href_id("/device/123"), Some(123));
        assert_eq!(href_id("/device/abc"), None);
        assert_eq!(href_id(""), None);
    }

    #[test]
    fn decode_device_definitions() {
        let raw = r#"{
            "CommuniqueType": "ReadResponse",
            "Header": {
                "StatusCode": "200 OK",
                "Url": "/device",
                "ClientTag": "1",
                "MessageBodyType": "MultipleDeviceDefinition"
            },
            "Body": {
                "Devices": [
                    {
                        "href": "/device/2",
                        "Name": "Ceiling",
                        "FullyQualifiedName": ["Living Room", "Ceiling"],
                        "DeviceType": "WallDimmer",
                        "LocalZones": [{"href": "/zone/1"}]
                    },
                    {
                        "href": "/device/9",
                        "Name": "Remote",
                        "FullyQualifiedName": ["Living Room", "Remote"],
                        "DeviceType": "Pico3ButtonRaiseLower",
                        "ButtonGroups": [{"href": "/buttongroup/5"}]
                    }
                ]
            }
        }"#;

        let message: LeapMessage = serde_json::from_str(raw).unwrap();
        assert!(message.status_is_success());

        let devices: Vec<DeviceDefinition> = message.decode_body("Devices").unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id(), Some(2));
        assert_eq!(devices[0].device_type, "WallDimmer");
        assert_eq!(devices[0].local_zones[0].href, "/zone/1");
        assert_eq!(devices[1].button_groups[0].href, "/buttongroup/5");
    }

    #[test]
    fn zone_status_notification_with_level() {
        let raw = r#"{
            "CommuniqueType": "ReadResponse",
            "Header": {
                "MessageBodyType": "OneZoneStatus",
                "Url": "/zone/1/status"
            },
            "Body": {
                "ZoneStatus": {"Level": 75, "Zone": {"href": "/zone/1"}}
            }
        }"#;

        let message: LeapMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            notification_from_message(&message),
            Some(LeapNotification::ZoneStatus { zone: 1, level: 75 })
        );
    }

    #[test]
    fn zone_status_notification_with_switched_level() {
        let raw = r#"{
            "CommuniqueType": "ReadResponse",
            "Header": {"MessageBodyType": "OneZoneStatus", "Url": "/zone/4/status"},
            "Body": {
                "ZoneStatus": {"SwitchedLevel": "On", "Zone": {"href": "/zone/4"}}
            }
        }"#;

        let message: LeapMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            notification_from_message(&message),
            Some(LeapNotification::ZoneStatus { zone: 4, level: 100 })
        );
    }

    #[test]
    fn button_event_notification() {
        let raw = r#"{
            "CommuniqueType": "ReadResponse",
            "Header": {
                "MessageBodyType": "OneButtonStatusEvent",
                "Url": "/button/101/status/event"
            },
            "Body": {
                "ButtonStatus": {
                    "Button": {"href": "/button/101"},
                    "ButtonEvent": {"EventType": "Press"}
                }
            }
        }"#;

        let message: LeapMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            notification_from_message(&message),
            Some(LeapNotification::Button {
                button: 101,
                action: ButtonAction::Press
            })
        );
    }

    #[test]
    fn unknown_body_type_is_ignored() {
        let raw = r#"{
            "CommuniqueType": "ReadResponse",
            "Header": {"MessageBodyType": "OneOccupancyGroupStatus"},
            "Body": {}
        }"#;

        let message: LeapMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(notification_from_message(&message), None);
    }

    #[test]
    fn error_status_detected() {
        let raw = r#"{
            "CommuniqueType": "ExceptionResponse",
            "Header": {"StatusCode": "401 Unauthorized", "ClientTag": "3"}
        }"#;

        let message: LeapMessage = serde_json::from_str(raw).unwrap();
        assert!(!message.status_is_success());
    }

    #[test]
    fn level_is_clamped_to_100() {
        let status = ZoneStatusBody {
            zone: Href { href: "/zone/1".into() },
            level: Some(150),
            switched_level: None,
        };
        assert_eq!(status.effective_level(), Some(100));
    }
}
