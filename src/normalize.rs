// MIT License - Copyright (c) 2026 Peter Wright
// Raw vendor state -> typed domain state

use std::fmt;

use serde::Serialize;

use crate::config::MissingFlag;
use crate::devices::Device;

/// Arming mode of a hub after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Disarmed,
    ArmedAway,
    ArmedNight,
    /// Unrecognized or missing raw state
    #[default]
    Unknown,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::ArmedAway => "armed_away",
            Self::ArmedNight => "armed_night",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw hub `state` string to an `AlarmState`.
///
/// Total: anything outside the known vocabulary, including a missing
/// value, yields `Unknown`. Matching is exact (the API emits upper case).
pub fn normalize_alarm(raw: Option<&str>) -> AlarmState {
    match raw {
        Some("DISARMED" | "DISARMED_NIGHT_MODE_OFF" | "DISARMED_NIGHT_MODE_ON") => {
            AlarmState::Disarmed
        }
        Some("ARMED" | "ARMED_NIGHT_MODE_OFF") => AlarmState::ArmedAway,
        Some("ARMED_NIGHT_MODE_ON" | "NIGHT_MODE") => AlarmState::ArmedNight,
        _ => AlarmState::Unknown,
    }
}

/// Raw fields that make up the fire composite flag.
pub const FIRE_FLAGS: [&str; 4] = [
    "smokeAlarmDetected",
    "coAlarmDetected",
    "temperatureAlarmDetected",
    "highTemperatureDiffDetected",
];

pub const REED_CLOSED: &str = "reedClosed";
pub const EXTRA_CONTACT_CLOSED: &str = "extraContactClosed";

/// Fire composite flag: any smoke, CO, temperature or temperature-rise alarm.
pub fn fire_alarm(device: &Device, policy: MissingFlag) -> bool {
    FIRE_FLAGS
        .iter()
        .any(|key| policy.resolve(device.flag(key)))
}

/// Door composite flag: reed contact explicitly open, or the external
/// contact explicitly closed.
pub fn door_alarm(device: &Device, policy: MissingFlag) -> bool {
    let reed_open = match device.flag(REED_CLOSED) {
        Some(closed) => !closed,
        None => policy == MissingFlag::Triggered,
    };
    reed_open || policy.resolve(device.flag(EXTRA_CONTACT_CLOSED))
}

/// Temperature reading in degrees Celsius.
pub fn temperature(device: &Device) -> Option<f64> {
    device.number("temperature")
}

/// Battery charge in percent.
pub fn battery_level(device: &Device) -> Option<u8> {
    device
        .raw
        .get("batteryChargeLevelPercentage")
        .and_then(serde_json::Value::as_u64)
        .map(|v| v.min(100) as u8)
}
