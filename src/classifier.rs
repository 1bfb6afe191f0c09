// MIT License - Copyright (c) 2026 Peter Wright
// Device type -> entity descriptors

use std::collections::BTreeSet;
use std::fmt;
use std::iter::Copied;
use std::slice::Iter;

use serde::Serialize;

use crate::devices::Device;

/// Host platform an entity is presented on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    AlarmControlPanel,
    BinarySensor,
    Sensor,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlarmControlPanel => "alarm_control_panel",
            Self::BinarySensor => "binary_sensor",
            Self::Sensor => "sensor",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute metadata attached to a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityMeta {
    /// `None` for devices of an unrecognized type
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
}

/// One (platform, metadata) pair produced for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub platform: Platform,
    pub meta: EntityMeta,
}

impl Descriptor {
    const fn new(platform: Platform, device_class: &'static str, unit: Option<&'static str>) -> Self {
        Self {
            platform,
            meta: EntityMeta {
                device_class: Some(device_class),
                unit,
            },
        }
    }

    const fn generic(platform: Platform) -> Self {
        Self {
            platform,
            meta: EntityMeta {
                device_class: None,
                unit: None,
            },
        }
    }
}

/// Lazy, restartable sequence of descriptors for one device.
///
/// Backed by a static table, so cloning the iterator replays the exact
/// same sequence.
pub type Descriptors = Copied<Iter<'static, Descriptor>>;

const CELSIUS: Option<&str> = Some("°C");

const FIRE: &[Descriptor] = &[
    Descriptor::new(Platform::BinarySensor, "smoke", None),
    Descriptor::new(Platform::Sensor, "temperature", CELSIUS),
];

const DOOR: &[Descriptor] = &[
    Descriptor::new(Platform::BinarySensor, "opening", None),
    Descriptor::new(Platform::Sensor, "door_temperature", CELSIUS),
];

const MOTION: &[Descriptor] = &[
    Descriptor::new(Platform::BinarySensor, "motion", None),
    Descriptor::new(Platform::Sensor, "motion_temperature", CELSIUS),
];

const GENERIC: &[Descriptor] = &[
    Descriptor::generic(Platform::BinarySensor),
    Descriptor::generic(Platform::Sensor),
];

/// Vendor `deviceType` tag -> descriptor set.
const DEVICE_TYPES: &[(&str, &[Descriptor])] = &[
    ("FireProtect", FIRE),
    ("FireProtectPlus", FIRE),
    ("FireProtect2", FIRE),
    ("FireProtect2Plus", FIRE),
    ("DoorProtect", DOOR),
    ("DoorProtectPlus", DOOR),
    ("DoorProtectFibra", DOOR),
    ("MotionProtect", MOTION),
    ("MotionProtectPlus", MOTION),
    ("MotionProtectOutdoor", MOTION),
    ("MotionProtectCurtain", MOTION),
    ("MotionCam", MOTION),
    ("CombiProtect", MOTION),
];

/// Descriptors for a raw device type tag. Unknown tags get the generic pair.
pub fn classify_type(device_type: &str) -> Descriptors {
    DEVICE_TYPES
        .iter()
        .find(|(tag, _)| *tag == device_type)
        .map_or(GENERIC, |(_, descriptors)| *descriptors)
        .iter()
        .copied()
}

/// Descriptors for a device.
pub fn classify(device: &Device) -> Descriptors {
    classify_type(&device.device_type)
}

/// Whether the tag is in the dispatch table.
pub fn is_known_type(device_type: &str) -> bool {
    DEVICE_TYPES.iter().any(|(tag, _)| *tag == device_type)
}

/// Platforms needed to present the given devices. The alarm panel
/// platform is always included.
pub fn required_platforms<'a>(devices: impl IntoIterator<Item = &'a Device>) -> BTreeSet<Platform> {
    let mut platforms: BTreeSet<Platform> = devices
        .into_iter()
        .flat_map(classify)
        .map(|d| d.platform)
        .collect();
    platforms.insert(Platform::AlarmControlPanel);
    platforms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(device_type: &str) -> Device {
        Device::from_payload("H1", json!({ "id": "D1", "deviceType": device_type })).unwrap()
    }

    #[test]
    fn test_fire_descriptors() {
        let descriptors: Vec<Descriptor> = classify(&device("FireProtectPlus")).collect();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].platform, Platform::BinarySensor);
        assert_eq!(descriptors[0].meta.device_class, Some("smoke"));
        assert_eq!(descriptors[1].platform, Platform::Sensor);
        assert_eq!(descriptors[1].meta.device_class, Some("temperature"));
        assert_eq!(descriptors[1].meta.unit, Some("°C"));
    }

    #[test]
    fn test_door_and_motion_descriptors() {
        let door: Vec<_> = classify(&device("DoorProtect"))
            .map(|d| d.meta.device_class)
            .collect();
        assert_eq!(door, vec![Some("opening"), Some("door_temperature")]);

        let motion: Vec<_> = classify(&device("MotionProtectOutdoor"))
            .map(|d| d.meta.device_class)
            .collect();
        assert_eq!(motion, vec![Some("motion"), Some("motion_temperature")]);
    }

    #[test]
    fn test_unknown_type_is_generic() {
        let descriptors: Vec<Descriptor> = classify(&device("LeaksProtect")).collect();
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors.iter().all(|d| d.meta.device_class.is_none()));
        assert_eq!(descriptors[0].platform, Platform::BinarySensor);
        assert_eq!(descriptors[1].platform, Platform::Sensor);
        assert!(!is_known_type("LeaksProtect"));
        assert!(is_known_type("MotionCam"));
    }

    #[test]
    fn test_empty_type_is_generic() {
        let d = Device::from_payload("H1", json!({ "id": "D1" })).unwrap();
        assert!(classify(&d).all(|d| d.meta.device_class.is_none()));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let d = device("FireProtect");
        let first: Vec<_> = classify(&d).collect();
        let second: Vec<_> = classify(&d).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_descriptors_restartable() {
        let iter = classify_type("DoorProtectPlus");
        let replay = iter.clone();
        assert_eq!(iter.collect::<Vec<_>>(), replay.collect::<Vec<_>>());
    }

    #[test]
    fn test_required_platforms_always_has_panel() {
        let none: Vec<Device> = Vec::new();
        let platforms = required_platforms(&none);
        assert_eq!(platforms.len(), 1);
        assert!(platforms.contains(&Platform::AlarmControlPanel));

        let devices = vec![device("FireProtect"), device("Unknown")];
        let platforms = required_platforms(&devices);
        assert_eq!(
            platforms.into_iter().collect::<Vec<_>>(),
            vec![Platform::AlarmControlPanel, Platform::BinarySensor, Platform::Sensor]
        );
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(Platform::AlarmControlPanel.to_string(), "alarm_control_panel");
        assert_eq!(Platform::BinarySensor.as_str(), "binary_sensor");
    }
}
