// MIT License - Copyright (c) 2026 Peter Wright
// Hub and device records

pub mod device;
pub mod hub;

pub use device::{Device, DeviceRef};
pub use hub::{Hub, HubRef};
