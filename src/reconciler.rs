// MIT License - Copyright (c) 2026 Peter Wright
// Polling reconciler: scheduled refresh, command dispatch, settle re-sync

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{AjaxApi, AlarmCommand};
use crate::config::{BridgeConfig, CommandRetry, FlagPolicies};
use crate::entity::{Entity, EntityKind, EntitySnapshot};
use crate::error::{AjaxError, Result};
use crate::normalize::AlarmState;
use crate::registry::EntityRegistry;

/// An entity and the lock that serializes its refreshes and commands.
pub type SharedEntity = Arc<Mutex<Entity>>;

/// Keeps presented entities in sync with the cloud.
///
/// Every entity sits behind its own mutex: a refresh or command holds it
/// for the whole read (or write + settle + read), so operations on one
/// entity never interleave while different entities proceed independently.
pub struct Reconciler<A: AjaxApi> {
    api: Arc<A>,
    registry: Arc<dyn EntityRegistry>,
    panels: BTreeMap<String, SharedEntity>,
    entities: Vec<SharedEntity>,
    policies: FlagPolicies,
    retry: CommandRetry,
    settle_delay: Duration,
    alarm_interval: Duration,
    sensor_interval: Duration,
}

impl<A: AjaxApi> Reconciler<A> {
    pub fn new(
        api: Arc<A>,
        registry: Arc<dyn EntityRegistry>,
        config: &BridgeConfig,
        entities: Vec<Entity>,
    ) -> Self {
        let mut panels = BTreeMap::new();
        let entities: Vec<SharedEntity> = entities
            .into_iter()
            .map(|entity| {
                let hub_id = entity.hub_id().to_string();
                let is_panel = entity.kind() == EntityKind::AlarmPanel;
                let shared = Arc::new(Mutex::new(entity));
                if is_panel {
                    panels.insert(hub_id, Arc::clone(&shared));
                }
                shared
            })
            .collect();

        Self {
            api,
            registry,
            panels,
            entities,
            policies: config.flag_policies,
            retry: config.command_retry,
            settle_delay: config.settle_delay(),
            alarm_interval: config.alarm_scan_interval(),
            sensor_interval: config.sensor_scan_interval(),
        }
    }

    pub fn hub_ids(&self) -> impl Iterator<Item = &str> {
        self.panels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Current snapshot of every entity.
    pub async fn snapshots(&self) -> Vec<EntitySnapshot> {
        let mut out = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            out.push(entity.lock().await.snapshot());
        }
        out
    }

    /// Snapshot of one entity by unique id.
    pub async fn snapshot(&self, unique_id: &str) -> Option<EntitySnapshot> {
        for entity in &self.entities {
            let guard = entity.lock().await;
            if guard.unique_id() == unique_id {
                return Some(guard.snapshot());
            }
        }
        None
    }

    /// Current normalized state of a hub's alarm panel.
    pub async fn alarm_state(&self, hub_id: &str) -> Option<AlarmState> {
        let panel = self.panels.get(hub_id)?;
        panel.lock().await.state().alarm()
    }

    /// Hand every entity to the registry and mark it registered. From
    /// here on refreshes are surfaced.
    pub async fn register_all(&self) {
        let mut snapshots = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            let mut guard = entity.lock().await;
            guard.mark_registered();
            snapshots.push(guard.snapshot());
        }
        info!("Registering {} entities", snapshots.len());
        self.registry.add_entities(snapshots);
    }

    /// Refresh every alarm panel once.
    pub async fn refresh_panels(&self) {
        for panel in self.panels.values() {
            self.refresh(panel).await;
        }
    }

    /// Refresh every entity once, panels first.
    pub async fn refresh_all(&self) {
        self.refresh_panels().await;
        for entity in &self.entities {
            if !self.is_panel(entity) {
                self.refresh(entity).await;
            }
        }
    }

    /// One scheduled refresh. Returns `false` when the read came back empty,
    /// in which case the cached state is left untouched.
    pub async fn refresh(&self, entity: &SharedEntity) -> bool {
        let mut guard = entity.lock().await;
        self.refresh_locked(&mut guard).await
    }

    async fn refresh_locked(&self, entity: &mut Entity) -> bool {
        let hub_id = entity.hub_id().to_string();
        let start = Instant::now();

        let applied = match (entity.kind(), entity.device_id().map(str::to_string)) {
            (EntityKind::AlarmPanel, _) => {
                let hub = self.api.get_hub_info(&hub_id).await;
                debug!("Hub {hub_id} read in {:?}", start.elapsed());
                match hub {
                    Some(hub) => {
                        entity.apply_hub(&hub);
                        true
                    }
                    None => {
                        warn!("Hub info is not available for update {hub_id}");
                        false
                    }
                }
            }
            (_, Some(device_id)) => {
                let device = self.api.get_device_info(&hub_id, &device_id).await;
                debug!(
                    "Device {device_id} read for {} in {:?}",
                    entity.unique_id(),
                    start.elapsed()
                );
                match device {
                    Some(device) => {
                        entity.apply_device(&device, &self.policies);
                        true
                    }
                    None => {
                        warn!("Device info is not available for update {device_id} (hub {hub_id})");
                        false
                    }
                }
            }
            (_, None) => false,
        };

        if applied && entity.is_registered() {
            self.registry.update_state(entity.snapshot());
        }
        applied
    }

    /// Send an arm/disarm command, wait the settle delay and refresh.
    ///
    /// The returned state is whatever the API reports after the settle
    /// delay; it may still show the pre-command mode if the hub has not
    /// caught up yet. Write errors are returned without refreshing.
    pub async fn command(&self, hub_id: &str, command: AlarmCommand) -> Result<AlarmState> {
        let panel = self.panels.get(hub_id).ok_or_else(|| AjaxError::UnknownHub {
            hub_id: hub_id.to_string(),
        })?;

        let mut guard = panel.lock().await;
        info!("{command} called for hub {hub_id}");
        self.write(hub_id, command).await?;

        sleep(self.settle_delay).await;
        self.refresh_locked(&mut guard).await;
        Ok(guard.state().alarm().unwrap_or_default())
    }

    async fn write(&self, hub_id: &str, command: AlarmCommand) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            let start = Instant::now();
            let result = self.api.send_command(hub_id, command).await;
            let elapsed = start.elapsed();
            match result {
                Ok(()) => {
                    info!("{command} hub {hub_id}: accepted in {elapsed:?}");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    warn!(
                        "{command} hub {hub_id} failed after {elapsed:?}: {e}. Retry {attempt}/{} in {}ms",
                        self.retry.attempts, self.retry.delay_ms
                    );
                    sleep(Duration::from_millis(self.retry.delay_ms)).await;
                }
                Err(e) => {
                    error!("{command} hub {hub_id} failed after {elapsed:?}: {e}");
                    return Err(e);
                }
            }
        }
    }

    fn is_panel(&self, entity: &SharedEntity) -> bool {
        self.panels.values().any(|panel| Arc::ptr_eq(panel, entity))
    }

    /// Spawn one recurring refresh job per entity.
    ///
    /// Panels were refreshed before registration, so their first tick is
    /// skipped; every other entity refreshes immediately.
    pub fn spawn_schedules(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.entities
            .iter()
            .map(|entity| {
                let is_panel = self.is_panel(entity);
                let period = if is_panel {
                    self.alarm_interval
                } else {
                    self.sensor_interval
                };
                let reconciler = Arc::clone(self);
                let entity = Arc::clone(entity);
                tokio::spawn(async move {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    if is_panel {
                        ticker.tick().await;
                    }
                    loop {
                        ticker.tick().await;
                        reconciler.refresh(&entity).await;
                    }
                })
            })
            .collect()
    }
}
