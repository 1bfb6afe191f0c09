// MIT License - Copyright (c) 2026 Peter Wright
// Presented entities: identity, device grouping, capabilities and cached state

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::classifier::{Descriptor, Platform};
use crate::config::FlagPolicies;
use crate::devices::{Device, Hub};
use crate::normalize::{self, AlarmState};

/// Manufacturer reported for every device.
pub const MANUFACTURER: &str = "Ajax";

bitflags! {
    /// Alarm panel capabilities.
    ///
    /// Bit values follow the host's alarm panel feature numbering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SupportedFeatures: u32 {
        const ARM_HOME    = 0b0000_0001;
        const ARM_AWAY    = 0b0000_0010;
        const ARM_NIGHT   = 0b0000_0100;
        const TRIGGER     = 0b0000_1000;
    }
}

impl Serialize for SupportedFeatures {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

/// Sensor family a binary sensor or sensor entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Generic,
    Fire,
    Door,
    Motion,
}

impl Family {
    /// Route a classifier descriptor to its family.
    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        match (descriptor.platform, descriptor.meta.device_class) {
            (Platform::BinarySensor, Some("smoke")) => Self::Fire,
            (Platform::BinarySensor, Some("opening")) => Self::Door,
            (Platform::BinarySensor, Some("motion")) => Self::Motion,
            (Platform::Sensor, Some("temperature")) => Self::Fire,
            (Platform::Sensor, Some("door_temperature")) => Self::Door,
            (Platform::Sensor, Some("motion_temperature")) => Self::Motion,
            _ => Self::Generic,
        }
    }

    /// Per-family behaviour table.
    pub fn strategy(self) -> &'static Strategy {
        match self {
            Self::Generic => &GENERIC_STRATEGY,
            Self::Fire => &FIRE_STRATEGY,
            Self::Door => &DOOR_STRATEGY,
            Self::Motion => &MOTION_STRATEGY,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generic => "generic",
            Self::Fire => "fire",
            Self::Door => "door",
            Self::Motion => "motion",
        };
        f.write_str(name)
    }
}

/// What an entity presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    AlarmPanel,
    BinarySensor(Family),
    Sensor(Family),
}

impl EntityKind {
    pub fn platform(&self) -> Platform {
        match self {
            Self::AlarmPanel => Platform::AlarmControlPanel,
            Self::BinarySensor(_) => Platform::BinarySensor,
            Self::Sensor(_) => Platform::Sensor,
        }
    }

    pub fn family(&self) -> Option<Family> {
        match self {
            Self::AlarmPanel => None,
            Self::BinarySensor(f) | Self::Sensor(f) => Some(*f),
        }
    }
}

/// Normalized state held by an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntityState {
    Alarm(AlarmState),
    /// `None` when the family has no composite flag
    Binary(Option<bool>),
    Numeric(Option<f64>),
}

impl EntityState {
    fn initial(kind: EntityKind) -> Self {
        match kind {
            EntityKind::AlarmPanel => Self::Alarm(AlarmState::Unknown),
            EntityKind::BinarySensor(_) => Self::Binary(None),
            EntityKind::Sensor(_) => Self::Numeric(None),
        }
    }

    pub fn alarm(&self) -> Option<AlarmState> {
        match self {
            Self::Alarm(state) => Some(*state),
            _ => None,
        }
    }
}

pub type Attributes = BTreeMap<&'static str, Value>;

/// Result of one refresh: the replacement state and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub state: EntityState,
    pub attributes: Attributes,
}

/// Device grouping descriptor. Child devices point at their hub via
/// `via_device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
    pub name: String,
    pub manufacturer: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

pub fn hub_identifier(hub_id: &str) -> String {
    format!("ajax_hub_{hub_id}")
}

pub fn device_identifier(device_id: &str) -> String {
    format!("ajax_{device_id}")
}

/// Fixed device name/model for a family; `None` falls back to the
/// payload's own name and type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTemplate {
    pub name: Option<&'static str>,
    pub model: Option<&'static str>,
}

pub type CompositeFn = fn(&Device, &FlagPolicies) -> Option<bool>;

/// Family behaviour: how to compute the binary flag, which raw fields to
/// expose as attributes, how to read the numeric value and how to
/// describe the physical device.
pub struct Strategy {
    pub composite: CompositeFn,
    pub binary_attributes: fn(&Device) -> Attributes,
    pub sensor_value: fn(&Device) -> Option<f64>,
    pub template: DeviceTemplate,
}

impl Strategy {
    pub fn refresh_binary(&self, device: &Device, policies: &FlagPolicies) -> Reading {
        Reading {
            state: EntityState::Binary((self.composite)(device, policies)),
            attributes: (self.binary_attributes)(device),
        }
    }

    pub fn refresh_sensor(&self, device: &Device) -> Reading {
        let mut attributes = Attributes::new();
        attributes.insert("battery_level", Value::from(normalize::battery_level(device)));
        Reading {
            state: EntityState::Numeric((self.sensor_value)(device)),
            attributes,
        }
    }

    pub fn device_info(&self, device: &Device) -> DeviceInfo {
        DeviceInfo {
            identifier: device_identifier(&device.id),
            via_device: Some(hub_identifier(&device.hub_id)),
            name: self
                .template
                .name
                .map_or_else(|| device.name.clone(), str::to_string),
            manufacturer: MANUFACTURER,
            model: self
                .template
                .model
                .map(str::to_string)
                .or_else(|| Some(device.device_type.clone()).filter(|t| !t.is_empty())),
            sw_version: device.firmware_version.clone(),
            serial_number: Some(device.id.clone()),
        }
    }
}

fn no_attributes(_: &Device) -> Attributes {
    Attributes::new()
}

fn fire_attributes(device: &Device) -> Attributes {
    Attributes::from([
        ("smoke_alarm", Value::from(device.flag("smokeAlarmDetected"))),
        ("temperature_alarm", Value::from(device.flag("temperatureAlarmDetected"))),
        ("temperature_rise_alarm", Value::from(device.flag("highTemperatureDiffDetected"))),
        ("high_co", Value::from(device.flag("coAlarmDetected"))),
    ])
}

fn door_attributes(device: &Device) -> Attributes {
    Attributes::from([
        ("reed_closed", Value::from(device.flag(normalize::REED_CLOSED))),
        ("extra_contact_alarm", Value::from(device.flag(normalize::EXTRA_CONTACT_CLOSED))),
    ])
}

fn motion_attributes(device: &Device) -> Attributes {
    Attributes::from([("raw_state", Value::from(device.text("state")))])
}

static GENERIC_STRATEGY: Strategy = Strategy {
    composite: |_, _| None,
    binary_attributes: no_attributes,
    sensor_value: |_| None,
    template: DeviceTemplate {
        name: None,
        model: None,
    },
};

static FIRE_STRATEGY: Strategy = Strategy {
    composite: |device, policies| Some(normalize::fire_alarm(device, policies.fire)),
    binary_attributes: fire_attributes,
    sensor_value: normalize::temperature,
    template: DeviceTemplate {
        name: Some("Ajax FireProtectPlus"),
        model: Some("FireProtectPlus"),
    },
};

static DOOR_STRATEGY: Strategy = Strategy {
    composite: |device, policies| Some(normalize::door_alarm(device, policies.door)),
    binary_attributes: door_attributes,
    sensor_value: normalize::temperature,
    template: DeviceTemplate {
        name: Some("Ajax DoorProtect"),
        model: Some("DoorProtect"),
    },
};

// Motion detectors only report an idle/active string; the binary flag
// stays off and the raw value is exposed as an attribute.
static MOTION_STRATEGY: Strategy = Strategy {
    composite: |_, _| Some(false),
    binary_attributes: motion_attributes,
    sensor_value: normalize::temperature,
    template: DeviceTemplate {
        name: Some("Ajax MotionProtect"),
        model: Some("MotionProtect"),
    },
};

/// A presented entity and its last-known normalized state.
#[derive(Debug, Clone)]
pub struct Entity {
    unique_id: String,
    name: String,
    kind: EntityKind,
    hub_id: String,
    device_id: Option<String>,
    device_class: Option<&'static str>,
    unit: Option<&'static str>,
    state: EntityState,
    attributes: Attributes,
    device_info: DeviceInfo,
    registered: bool,
    last_updated: Option<DateTime<Utc>>,
}

impl Entity {
    /// Alarm panel for a hub. State starts as `Unknown` until the first
    /// refresh.
    pub fn alarm_panel(hub_id: &str) -> Self {
        let kind = EntityKind::AlarmPanel;
        Self {
            unique_id: format!("ajax_{hub_id}_alarm"),
            name: format!("Ajax Hub {hub_id}"),
            kind,
            hub_id: hub_id.to_string(),
            device_id: None,
            device_class: None,
            unit: None,
            state: EntityState::initial(kind),
            attributes: Attributes::new(),
            device_info: DeviceInfo {
                identifier: hub_identifier(hub_id),
                via_device: None,
                name: format!("Ajax Hub {hub_id}"),
                manufacturer: MANUFACTURER,
                model: None,
                sw_version: None,
                serial_number: None,
            },
            registered: false,
            last_updated: None,
        }
    }

    /// Binary sensor or sensor entity for one classifier descriptor.
    /// Returns `None` for alarm panel descriptors, which are built per hub.
    pub fn from_descriptor(device: &Device, descriptor: Descriptor) -> Option<Self> {
        let family = Family::from_descriptor(&descriptor);
        let kind = match descriptor.platform {
            Platform::BinarySensor => EntityKind::BinarySensor(family),
            Platform::Sensor => EntityKind::Sensor(family),
            Platform::AlarmControlPanel => return None,
        };
        // Generic devices produce one descriptor per platform with no class,
        // so fall back to the platform to keep ids distinct.
        let suffix = descriptor
            .meta
            .device_class
            .unwrap_or(descriptor.platform.as_str());
        Some(Self {
            unique_id: format!("ajax_{}_{}", device.id, suffix),
            name: format!("{} ({})", device.name, device.id),
            kind,
            hub_id: device.hub_id.clone(),
            device_id: Some(device.id.clone()),
            device_class: descriptor.meta.device_class,
            unit: descriptor.meta.unit,
            state: EntityState::initial(kind),
            attributes: Attributes::new(),
            device_info: family.strategy().device_info(device),
            registered: false,
            last_updated: None,
        })
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn device_class(&self) -> Option<&'static str> {
        self.device_class
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.unit
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn supported_features(&self) -> SupportedFeatures {
        match self.kind {
            EntityKind::AlarmPanel => SupportedFeatures::ARM_AWAY | SupportedFeatures::ARM_NIGHT,
            _ => SupportedFeatures::empty(),
        }
    }

    /// Arming and disarming never require a code.
    pub fn code_required(&self) -> bool {
        false
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    /// Replace the panel state from a fresh hub read.
    pub fn apply_hub(&mut self, hub: &Hub) {
        self.state = EntityState::Alarm(normalize::normalize_alarm(hub.state.as_deref()));
        self.attributes = Attributes::from([("raw_state", Value::from(hub.state.clone()))]);
        if let Some(name) = &hub.name {
            self.device_info.name = name.clone();
        }
        self.device_info.model = hub.subtype.clone();
        self.device_info.sw_version = hub.firmware_version.clone();
        self.device_info.serial_number = hub.serial.clone();
        self.last_updated = Some(Utc::now());
    }

    /// Replace a sensor's state from a fresh device read.
    pub fn apply_device(&mut self, device: &Device, policies: &FlagPolicies) {
        let (strategy, reading) = match self.kind {
            EntityKind::AlarmPanel => return,
            EntityKind::BinarySensor(family) => {
                let strategy = family.strategy();
                (strategy, strategy.refresh_binary(device, policies))
            }
            EntityKind::Sensor(family) => {
                let strategy = family.strategy();
                (strategy, strategy.refresh_sensor(device))
            }
        };
        self.state = reading.state;
        self.attributes = reading.attributes;
        let fresh = strategy.device_info(device);
        self.device_info.sw_version = fresh.sw_version;
        if strategy.template.name.is_none() {
            self.device_info.name = fresh.name;
        }
        self.last_updated = Some(Utc::now());
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            unique_id: self.unique_id.clone(),
            name: self.name.clone(),
            platform: self.kind.platform(),
            family: self.kind.family(),
            device_class: self.device_class,
            unit: self.unit,
            hub_id: self.hub_id.clone(),
            device_id: self.device_id.clone(),
            state: self.state,
            attributes: self.attributes.clone(),
            supported_features: self.supported_features(),
            code_required: self.code_required(),
            device: self.device_info.clone(),
            last_updated: self.last_updated,
        }
    }
}

/// Owned, serializable view of an entity handed to the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub unique_id: String,
    pub name: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<Family>,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub hub_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub state: EntityState,
    pub attributes: Attributes,
    pub supported_features: SupportedFeatures,
    pub code_required: bool,
    pub device: DeviceInfo,
    pub last_updated: Option<DateTime<Utc>>,
}
