// MIT License - Copyright (c) 2026 Peter Wright
// Ajax hub records

use serde::Deserialize;
use serde_json::Value;

/// Entry of the account hub list (`GET /user/{userId}/hubs`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubRef {
    pub hub_id: String,
    #[serde(default)]
    pub hub_binding_role: Option<String>,
}

/// A hub as reported by `GET /user/{userId}/hubs/{hubId}`.
///
/// Only the fields the bridge consumes are lifted out of the payload;
/// the arming state is kept as the raw vendor string and normalized
/// separately.
#[derive(Debug, Clone, PartialEq)]
pub struct Hub {
    pub id: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub firmware_version: Option<String>,
    pub subtype: Option<String>,
    pub serial: Option<String>,
}

impl Hub {
    /// Build a hub from its info payload. `hub_id` is the id the hub was
    /// requested under and stays authoritative even if the payload omits it.
    pub fn from_payload(hub_id: &str, payload: &Value) -> Self {
        Self {
            id: hub_id.to_string(),
            name: text(payload, "name"),
            state: text(payload, "state"),
            firmware_version: payload
                .get("firmware")
                .and_then(|fw| text(fw, "version")),
            subtype: text(payload, "hubSubtype"),
            serial: text(payload, "id"),
        }
    }
}

/// Read a string-ish field; numeric ids are rendered as text.
pub(crate) fn text(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
