// MIT License - Copyright (c) 2026 Peter Wright
// Remote API client port

pub mod http;

use std::fmt;
use std::future::Future;

use crate::devices::{Device, DeviceRef, Hub, HubRef};
use crate::error::Result;

pub use http::AjaxHttpClient;

/// Arm/disarm command for a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmCommand {
    ArmAway,
    ArmNight,
    Disarm,
}

impl AlarmCommand {
    /// Command name as used on the MQTT command topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArmAway => "ARM_AWAY",
            Self::ArmNight => "ARM_NIGHT",
            Self::Disarm => "DISARM",
        }
    }

    /// Parse an MQTT command name.
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "ARM_AWAY" => Some(Self::ArmAway),
            "ARM_NIGHT" => Some(Self::ArmNight),
            "DISARM" => Some(Self::Disarm),
            _ => None,
        }
    }

    /// Value of the `command` field in the arming request body.
    pub fn wire_command(&self) -> &'static str {
        match self {
            Self::ArmAway => "ARM",
            Self::ArmNight => "NIGHT_MODE_ON",
            Self::Disarm => "DISARM",
        }
    }
}

impl fmt::Display for AlarmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated access to the Ajax cloud.
///
/// Reads never fail: transport and decoding problems are logged by the
/// implementation and surface as an empty list or `None`. Writes return
/// their error to the caller.
pub trait AjaxApi: Send + Sync + 'static {
    fn get_hubs(&self) -> impl Future<Output = Vec<HubRef>> + Send;

    fn get_hub_info(&self, hub_id: &str) -> impl Future<Output = Option<Hub>> + Send;

    fn get_hub_devices(&self, hub_id: &str) -> impl Future<Output = Vec<DeviceRef>> + Send;

    fn get_device_info(
        &self,
        hub_id: &str,
        device_id: &str,
    ) -> impl Future<Output = Option<Device>> + Send;

    fn arm_hub(&self, hub_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn arm_hub_night(&self, hub_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn disarm_hub(&self, hub_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Dispatch an `AlarmCommand` to the matching write.
    fn send_command(
        &self,
        hub_id: &str,
        command: AlarmCommand,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            match command {
                AlarmCommand::ArmAway => self.arm_hub(hub_id).await,
                AlarmCommand::ArmNight => self.arm_hub_night(hub_id).await,
                AlarmCommand::Disarm => self.disarm_hub(hub_id).await,
            }
        }
    }
}
