// MIT License - Copyright (c) 2026 Peter Wright
// Per-instance context: discovery, entity construction, lifecycle

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{AjaxApi, AlarmCommand};
use crate::classifier::{self, Platform};
use crate::config::BridgeConfig;
use crate::devices::Device;
use crate::entity::{Entity, EntitySnapshot};
use crate::error::{AjaxError, Result};
use crate::normalize::AlarmState;
use crate::reconciler::Reconciler;
use crate::registry::EntityRegistry;

/// One running account: the discovered hubs and devices, the reconciler
/// that mirrors them and its scheduled jobs.
///
/// Created by `setup`, torn down by `unload` (or on drop).
pub struct AjaxIntegration<A: AjaxApi> {
    reconciler: Arc<Reconciler<A>>,
    registry: Arc<dyn EntityRegistry>,
    devices_by_hub: BTreeMap<String, Vec<Device>>,
    platforms: BTreeSet<Platform>,
    tasks: Vec<JoinHandle<()>>,
}

impl<A: AjaxApi> AjaxIntegration<A> {
    /// Discover hubs and devices, build the entities, give alarm panels
    /// their first refresh and register everything.
    ///
    /// Fails with `AjaxError::NoHubs` if the account lists no hubs (or the
    /// list could not be read), or with `AjaxError::InvalidConfig` before any
    /// request if a scan interval or the request timeout is zero. Devices
    /// whose info read comes back empty are skipped; a device listed twice
    /// on a hub is read once.
    pub async fn setup(
        config: &BridgeConfig,
        api: Arc<A>,
        registry: Arc<dyn EntityRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();

        let mut hub_ids: Vec<String> = Vec::new();
        for hub in api.get_hubs().await {
            if !hub_ids.contains(&hub.hub_id) {
                hub_ids.push(hub.hub_id);
            }
        }
        if hub_ids.is_empty() {
            return Err(AjaxError::NoHubs);
        }
        info!("Found {} hubs", hub_ids.len());

        let mut devices_by_hub = BTreeMap::new();
        for hub_id in &hub_ids {
            let mut devices = Vec::new();
            let mut seen = BTreeSet::new();
            for device_ref in api.get_hub_devices(hub_id).await {
                if !seen.insert(device_ref.id.clone()) {
                    debug!("Device {} listed twice on hub {hub_id}", device_ref.id);
                    continue;
                }
                match api.get_device_info(hub_id, &device_ref.id).await {
                    Some(device) => {
                        if !classifier::is_known_type(&device.device_type) {
                            debug!(
                                "Device {} has unrecognized type {:?}, using generic entities",
                                device.id, device.device_type
                            );
                        }
                        devices.push(device);
                    }
                    None => warn!("Skipping device {} on hub {hub_id}: no info", device_ref.id),
                }
            }
            debug!("Hub {hub_id}: {} devices", devices.len());
            devices_by_hub.insert(hub_id.clone(), devices);
        }

        let platforms = classifier::required_platforms(devices_by_hub.values().flatten());
        let entities = build_entities(&hub_ids, &devices_by_hub, &platforms);

        let reconciler = Arc::new(Reconciler::new(
            api,
            Arc::clone(&registry),
            config,
            entities,
        ));
        reconciler.refresh_panels().await;
        reconciler.register_all().await;

        info!(
            "Setup complete in {:?}: {} hubs, {} devices, {} entities, platforms [{}]",
            start.elapsed(),
            hub_ids.len(),
            devices_by_hub.values().map(Vec::len).sum::<usize>(),
            reconciler.len(),
            platforms
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            reconciler,
            registry,
            devices_by_hub,
            platforms,
            tasks: Vec::new(),
        })
    }

    /// Start the recurring refresh jobs. Calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        self.tasks = self.reconciler.spawn_schedules();
        debug!("Started {} refresh jobs", self.tasks.len());
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Stop all jobs and withdraw the entities from the registry.
    pub async fn unload(mut self) {
        info!("Unloading Ajax integration");
        self.stop_tasks();
        let ids = self
            .reconciler
            .snapshots()
            .await
            .into_iter()
            .map(|s| s.unique_id)
            .collect();
        self.registry.remove_entities(ids);
    }

    fn stop_tasks(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<A>> {
        &self.reconciler
    }

    pub fn platforms(&self) -> &BTreeSet<Platform> {
        &self.platforms
    }

    pub fn hub_ids(&self) -> impl Iterator<Item = &str> {
        self.devices_by_hub.keys().map(String::as_str)
    }

    pub fn devices(&self, hub_id: &str) -> &[Device] {
        self.devices_by_hub
            .get(hub_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub async fn command(&self, hub_id: &str, command: AlarmCommand) -> Result<AlarmState> {
        self.reconciler.command(hub_id, command).await
    }

    pub async fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.reconciler.snapshots().await
    }
}

impl<A: AjaxApi> Drop for AjaxIntegration<A> {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// One alarm panel per hub, then every descriptor of every device whose
/// platform is in `platforms`.
fn build_entities(
    hub_ids: &[String],
    devices_by_hub: &BTreeMap<String, Vec<Device>>,
    platforms: &BTreeSet<Platform>,
) -> Vec<Entity> {
    let mut entities: Vec<Entity> = hub_ids.iter().map(|id| Entity::alarm_panel(id)).collect();
    for device in devices_by_hub.values().flatten() {
        entities.extend(
            classifier::classify(device)
                .filter(|d| platforms.contains(&d.platform))
                .filter_map(|d| Entity::from_descriptor(device, d)),
        );
    }
    entities
}
