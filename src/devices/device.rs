// MIT License - Copyright (c) 2026 Peter Wright
// Ajax device (detector) records

use serde::Deserialize;
use serde_json::Value;

use super::hub::text;

/// Entry of a hub's device list (`GET .../hubs/{hubId}/devices`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRef {
    pub id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
}

/// A detector attached to a hub.
///
/// The vendor payload varies per device type, so it is kept verbatim in
/// `raw` and read through the typed accessors below.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub hub_id: String,
    pub name: String,
    pub device_type: String,
    pub firmware_version: Option<String>,
    pub raw: Value,
}

impl Device {
    /// Build a device from its info payload. Returns `None` when the
    /// payload is not an object or carries no `id`.
    pub fn from_payload(hub_id: &str, payload: Value) -> Option<Self> {
        if !payload.is_object() {
            return None;
        }
        let id = text(&payload, "id")?;
        let name = text(&payload, "deviceName").unwrap_or_else(|| id.clone());
        let device_type = text(&payload, "deviceType").unwrap_or_default();
        let firmware_version = text(&payload, "firmwareVersion");
        Some(Self {
            id,
            hub_id: hub_id.to_string(),
            name,
            device_type,
            firmware_version,
            raw: payload,
        })
    }

    /// Raw boolean field; absent or non-boolean values read as `None`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.raw.get(key).and_then(Value::as_bool)
    }

    /// Raw numeric field.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.raw.get(key).and_then(Value::as_f64)
    }

    /// Raw string field.
    pub fn text(&self, key: &str) -> Option<String> {
        text(&self.raw, key)
    }
}
