// MIT License - Copyright (c) 2026 Peter Wright
//
//! # ajax-cloud-bridge
//!
//! Mirrors Ajax Systems hubs and detectors from the Ajax cloud API as a
//! small set of typed entities: one alarm panel per hub, plus binary
//! sensors and temperature sensors for fire, door and motion detectors.
//!
//! The cloud is polled on a schedule (15 s for alarm panels, 30 s for
//! everything else). Arm/disarm commands are written, followed by a short
//! settle delay and a confirming refresh.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ajax_cloud_bridge::{AjaxHttpClient, AjaxIntegration, AlarmCommand, BridgeConfig, EventRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::builder()
//!         .api_key("api-key")
//!         .session_token("session-token")
//!         .user_id("user-id")
//!         .build();
//!
//!     let api = Arc::new(AjaxHttpClient::new(&config)?);
//!     let registry = Arc::new(EventRegistry::default());
//!
//!     let mut events = registry.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut ajax = AjaxIntegration::setup(&config, api, registry).await?;
//!     ajax.start();
//!
//!     let state = ajax.command("0003A1B2", AlarmCommand::ArmNight).await?;
//!     println!("Hub is now {state}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     ajax.unload().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod classifier;
pub mod config;
pub mod devices;
pub mod entity;
pub mod error;
pub mod event;
pub mod integration;
pub mod normalize;
pub mod reconciler;
pub mod registry;

// Re-exports for convenience
pub use api::{AjaxApi, AjaxHttpClient, AlarmCommand};
pub use classifier::{classify, Descriptor, EntityMeta, Platform};
pub use config::{BridgeConfig, BridgeConfigBuilder, CommandRetry, FlagPolicies, MissingFlag};
pub use devices::{Device, DeviceRef, Hub, HubRef};
pub use entity::{DeviceInfo, Entity, EntityKind, EntitySnapshot, EntityState, Family, SupportedFeatures};
pub use error::{AjaxError, Result};
pub use event::{BridgeEvent, EventReceiver};
pub use integration::AjaxIntegration;
pub use normalize::{normalize_alarm, AlarmState};
pub use reconciler::Reconciler;
pub use registry::{EntityRegistry, EventRegistry};
