//! Device records and actions

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of device, which decides the allowed actions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Light,
    Switch,
    Outlet,
    Fan,
    Thermostat,
    /// Anything else, kept verbatim
    Other(String),
    #[default]
    Unknown,
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "light" => Self::Light,
            "switch" => Self::Switch,
            "outlet" | "plug" => Self::Outlet,
            "fan" => Self::Fan,
            "thermostat" => Self::Thermostat,
            "unknown" | "" => Self::Unknown,
            _ => Self::Other(value),
        }
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

impl DeviceType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Light => "light",
            Self::Switch => "switch",
            Self::Outlet => "outlet",
            Self::Fan => "fan",
            Self::Thermostat => "thermostat",
            Self::Other(name) => name,
            Self::Unknown => "unknown",
        }
    }

    /// Whether `action` is on this type's allow-list
    #[must_use]
    pub const fn allows(&self, action: &Action) -> bool {
        match action {
            Action::On | Action::Off => true,
            Action::Toggle => !matches!(self, Self::Thermostat),
            Action::Brightness(_) => matches!(self, Self::Light),
            Action::Temperature(_) => matches!(self, Self::Thermostat),
        }
    }
}

/// Transport used to reach a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Mqtt,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Mqtt => f.write_str("mqtt"),
        }
    }
}

/// Broker credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Broker and topics for an MQTT device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Command topic; defaults to `home/{id}/{action}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Retained state topic read on refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<MqttAuth>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

const fn default_mqtt_port() -> u16 {
    1883
}

/// One controllable device
///
/// `status` is a cache of the last known state and may be stale.
/// Fields this type does not know are kept in `extra` and written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Registry key; not stored inside the record
    #[serde(skip)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub device_type: DeviceType,

    pub protocol: Protocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// HTTP method for control requests, PUT when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Last known levels such as brightness or temperature
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,

    /// Status was applied optimistically and is unconfirmed until then
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_until: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    /// Lowercased display name for spoken replies
    #[must_use]
    pub fn spoken_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.id.replace('_', " ")
        } else {
            self.name.to_lowercase()
        }
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        self.status.as_deref() == Some("on")
    }

    /// Whether the cached status is an unconfirmed optimistic update
    #[must_use]
    pub fn is_optimistic(&self, now: DateTime<Utc>) -> bool {
        self.optimistic_until.is_some_and(|until| until > now)
    }

    /// Public listing entry
    #[must_use]
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            device_type: self.device_type.as_str().to_string(),
            protocol: self.protocol,
            status: self.status.clone().unwrap_or_else(|| "offline".to_string()),
            attributes: self.attributes.clone(),
        }
    }
}

/// Device as reported to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub protocol: Protocol,
    pub status: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// A requested change to a device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    On,
    Off,
    /// Resolved to `On` or `Off` from the current status before sending
    Toggle,
    /// Percent, 0 to 100
    Brightness(u8),
    /// Target temperature in the device's unit
    Temperature(f64),
}

impl Action {
    /// Parse an API action name with optional parameters
    ///
    /// Returns `None` for unknown names or missing or out-of-range values.
    #[must_use]
    pub fn from_request(name: &str, params: &Map<String, Value>) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "on" | "turn_on" => Some(Self::On),
            "off" | "turn_off" => Some(Self::Off),
            "toggle" => Some(Self::Toggle),
            "brightness" | "set_brightness" => {
                let level = params.get("brightness").and_then(Value::as_u64)?;
                u8::try_from(level)
                    .ok()
                    .filter(|l| *l <= 100)
                    .map(Self::Brightness)
            }
            "temperature" | "set_temperature" => params
                .get("temperature")
                .and_then(Value::as_f64)
                .map(Self::Temperature),
            "set" => {
                if params.contains_key("brightness") {
                    Self::from_request("brightness", params)
                } else {
                    Self::from_request("temperature", params)
                }
            }
            _ => None,
        }
    }

    /// Short verb phrase for messages
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::On => "turn on",
            Self::Off => "turn off",
            Self::Toggle => "toggle",
            Self::Brightness(_) => "set brightness",
            Self::Temperature(_) => "set temperature",
        }
    }

    /// Action name and params sent to the device
    #[must_use]
    pub fn wire(&self) -> (&'static str, Value) {
        match self {
            Self::On => ("on", Value::Object(Map::new())),
            Self::Off => ("off", Value::Object(Map::new())),
            Self::Toggle => ("toggle", Value::Object(Map::new())),
            Self::Brightness(level) => ("set", serde_json::json!({ "brightness": level })),
            Self::Temperature(degrees) => ("set", serde_json::json!({ "temperature": degrees })),
        }
    }

    /// Apply the expected result of this action to a cached device
    pub fn apply_to(&self, device: &mut Device) {
        match self {
            Self::On => device.status = Some("on".to_string()),
            Self::Off => device.status = Some("off".to_string()),
            Self::Toggle => {
                let next = if device.is_on() { "off" } else { "on" };
                device.status = Some(next.to_string());
            }
            Self::Brightness(level) => {
                device
                    .attributes
                    .insert("brightness".to_string(), Value::from(*level));
                let status = if *level == 0 { "off" } else { "on" };
                device.status = Some(status.to_string());
            }
            Self::Temperature(degrees) => {
                device
                    .attributes
                    .insert("temperature".to_string(), Value::from(*degrees));
            }
        }
    }

    /// Spoken confirmation after a successful call
    #[must_use]
    pub fn confirmation(&self, device: &Device) -> String {
        let name = device.spoken_name();
        match self {
            Self::On => format!("Turning on the {name}."),
            Self::Off => format!("Turning off the {name}."),
            Self::Toggle => format!("Toggling the {name}."),
            Self::Brightness(level) => format!("Setting the {name} to {level} percent."),
            Self::Temperature(degrees) => format!("Setting the {name} to {degrees} degrees."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light() -> Device {
        serde_json::from_value::<Device>(serde_json::json!({
            "name": "Bedroom Light",
            "type": "light",
            "protocol": "http",
            "url": "http://127.0.0.1/light",
            "status": "off",
            "room": "upstairs"
        }))
        .unwrap()
    }

    #[test]
    fn test_unknown_fields_kept() {
        let device = light();
        assert_eq!(device.extra.get("room"), Some(&Value::from("upstairs")));

        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["room"], "upstairs");
        assert_eq!(value["type"], "light");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_unknown_type_roundtrips() {
        let ty: DeviceType = serde_json::from_str("\"blinds\"").unwrap();
        assert_eq!(ty, DeviceType::Other("blinds".to_string()));
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"blinds\"");
    }

    #[test]
    fn test_allow_list() {
        assert!(DeviceType::Light.allows(&Action::Brightness(40)));
        assert!(!DeviceType::Switch.allows(&Action::Brightness(40)));
        assert!(DeviceType::Thermostat.allows(&Action::Temperature(70.0)));
        assert!(!DeviceType::Thermostat.allows(&Action::Toggle));
    }

    #[test]
    fn test_action_from_request() {
        let mut params = Map::new();
        assert_eq!(Action::from_request("ON", &params), Some(Action::On));
        assert_eq!(Action::from_request("brightness", &params), None);

        params.insert("brightness".to_string(), Value::from(140));
        assert_eq!(Action::from_request("set", &params), None);

        params.insert("brightness".to_string(), Value::from(40));
        assert_eq!(Action::from_request("set", &params), Some(Action::Brightness(40)));
        assert_eq!(Action::from_request("explode", &params), None);
    }

    #[test]
    fn test_apply_and_confirm() {
        let mut device = light();
        Action::Brightness(0).apply_to(&mut device);
        assert_eq!(device.status.as_deref(), Some("off"));
        assert_eq!(device.attributes["brightness"], 0);

        Action::Toggle.apply_to(&mut device);
        assert!(device.is_on());
        assert_eq!(
            Action::On.confirmation(&device),
            "Turning on the bedroom light."
        );
    }
}
