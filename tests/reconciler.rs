// Reconciler and setup behaviour against a scripted in-memory API.
//
// Time is paused, so settle delays and refresh schedules run on the
// virtual tokio clock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::time::{sleep, Duration, Instant};

use ajax_cloud_bridge::{
    AjaxApi, AjaxError, AjaxIntegration, AlarmCommand, AlarmState, BridgeConfig, BridgeEvent,
    CommandRetry, Device, DeviceRef, EntityState, EventRegistry, Hub, HubRef, Platform, Result,
};

// ── Scripted API ────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedApi {
    hubs: Vec<&'static str>,
    /// device id -> info payload; `None` means the info read comes back empty
    devices: Mutex<BTreeMap<&'static str, Option<Value>>>,
    /// List every device twice in the hub's device list
    repeat_device_refs: bool,
    hub_state: Mutex<Option<&'static str>>,
    /// State the hub reports once the given instant has passed
    pending: Mutex<Option<(&'static str, Instant)>>,
    /// How long after a write the hub starts reporting the new state
    apply_after: Duration,
    /// HTTP statuses returned by the next writes
    write_failures: Mutex<VecDeque<u16>>,
    writes: Mutex<Vec<AlarmCommand>>,
    hub_reads: AtomicUsize,
    device_reads: AtomicUsize,
}

impl ScriptedApi {
    fn with_hub(state: &'static str) -> Self {
        Self {
            hubs: vec!["H1"],
            hub_state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    fn device(self, id: &'static str, payload: Option<Value>) -> Self {
        self.set_device(id, payload);
        self
    }

    fn set_device(&self, id: &'static str, payload: Option<Value>) {
        self.devices.lock().unwrap().insert(id, payload);
    }

    fn set_hub_state(&self, state: Option<&'static str>) {
        *self.hub_state.lock().unwrap() = state;
    }

    fn write(&self, command: AlarmCommand, target: &'static str) -> Result<()> {
        self.writes.lock().unwrap().push(command);
        if let Some(status) = self.write_failures.lock().unwrap().pop_front() {
            return Err(AjaxError::Api {
                status,
                body: "scripted failure".to_string(),
            });
        }
        *self.pending.lock().unwrap() = Some((target, Instant::now() + self.apply_after));
        Ok(())
    }

    fn hub_reads(&self) -> usize {
        self.hub_reads.load(Ordering::SeqCst)
    }

    fn device_reads(&self) -> usize {
        self.device_reads.load(Ordering::SeqCst)
    }

    fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl AjaxApi for ScriptedApi {
    async fn get_hubs(&self) -> Vec<HubRef> {
        self.hubs
            .iter()
            .map(|id| HubRef {
                hub_id: id.to_string(),
                hub_binding_role: None,
            })
            .collect()
    }

    async fn get_hub_info(&self, hub_id: &str) -> Option<Hub> {
        self.hub_reads.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        if let Some((state, at)) = *pending
            && Instant::now() >= at
        {
            *self.hub_state.lock().unwrap() = Some(state);
            *pending = None;
        }
        let state = (*self.hub_state.lock().unwrap())?;
        Some(Hub::from_payload(
            hub_id,
            &json!({ "id": hub_id, "name": "Home", "state": state }),
        ))
    }

    async fn get_hub_devices(&self, _hub_id: &str) -> Vec<DeviceRef> {
        let copies = if self.repeat_device_refs { 2 } else { 1 };
        let ids: Vec<&'static str> = self.devices.lock().unwrap().keys().copied().collect();
        (0..copies)
            .flat_map(|_| ids.iter())
            .map(|id| DeviceRef {
                id: id.to_string(),
                device_name: None,
                device_type: None,
            })
            .collect()
    }

    async fn get_device_info(&self, hub_id: &str, device_id: &str) -> Option<Device> {
        self.device_reads.fetch_add(1, Ordering::SeqCst);
        let payload = self.devices.lock().unwrap().get(device_id)?.clone()?;
        Device::from_payload(hub_id, payload)
    }

    async fn arm_hub(&self, _hub_id: &str) -> Result<()> {
        self.write(AlarmCommand::ArmAway, "ARMED")
    }

    async fn arm_hub_night(&self, _hub_id: &str) -> Result<()> {
        self.write(AlarmCommand::ArmNight, "NIGHT_MODE")
    }

    async fn disarm_hub(&self, _hub_id: &str) -> Result<()> {
        self.write(AlarmCommand::Disarm, "DISARMED")
    }
}

fn fire_detector() -> Value {
    json!({
        "id": "F1",
        "deviceName": "Kitchen",
        "deviceType": "FireProtectPlus",
        "smokeAlarmDetected": false,
        "temperature": 21.0
    })
}

fn config() -> BridgeConfig {
    BridgeConfig::builder().build()
}

async fn setup(
    api: ScriptedApi,
    config: &BridgeConfig,
) -> (Arc<ScriptedApi>, Arc<EventRegistry>, AjaxIntegration<ScriptedApi>) {
    let api = Arc::new(api);
    let registry = Arc::new(EventRegistry::new(64));
    let integration = AjaxIntegration::setup(config, Arc::clone(&api), registry.clone())
        .await
        .unwrap();
    (api, registry, integration)
}

// ── Setup ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_setup_fails_without_hubs() {
    let api = Arc::new(ScriptedApi::default());
    let registry = Arc::new(EventRegistry::new(8));
    let mut rx = registry.subscribe();

    let result = AjaxIntegration::setup(&config(), api, registry).await;

    assert!(matches!(result, Err(AjaxError::NoHubs)));
    assert!(rx.try_recv().is_err(), "no entities may be registered");
}

#[tokio::test]
async fn test_setup_refreshes_panels_before_registering() {
    let api = Arc::new(ScriptedApi::with_hub("ARMED_NIGHT_MODE_OFF"));
    let registry = Arc::new(EventRegistry::new(8));
    let mut rx = registry.subscribe();

    let integration = AjaxIntegration::setup(&config(), Arc::clone(&api), registry)
        .await
        .unwrap();

    assert_eq!(api.hub_reads(), 1);
    match rx.try_recv().unwrap() {
        BridgeEvent::EntitiesAdded(entities) => {
            assert_eq!(entities.len(), 1);
            assert_eq!(entities[0].unique_id, "ajax_H1_alarm");
            assert_eq!(entities[0].state, EntityState::Alarm(AlarmState::ArmedAway));
            assert_eq!(entities[0].device.name, "Home");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    // The initial refresh happened before registration, so it is not surfaced.
    assert!(rx.try_recv().is_err());

    let platforms: Vec<Platform> = integration.platforms().iter().copied().collect();
    assert_eq!(platforms, vec![Platform::AlarmControlPanel]);
}

#[tokio::test]
async fn test_setup_skips_devices_without_info() {
    let api = ScriptedApi::with_hub("DISARMED")
        .device("F1", Some(fire_detector()))
        .device("Z9", None);

    let (_api, _registry, integration) = setup(api, &config()).await;

    assert_eq!(integration.devices("H1").len(), 1);
    assert_eq!(integration.devices("H1")[0].id, "F1");
    assert_eq!(
        integration.platforms().iter().copied().collect::<Vec<_>>(),
        vec![Platform::AlarmControlPanel, Platform::BinarySensor, Platform::Sensor]
    );

    let ids: Vec<String> = integration
        .snapshots()
        .await
        .into_iter()
        .map(|s| s.unique_id)
        .collect();
    assert_eq!(ids, vec!["ajax_H1_alarm", "ajax_F1_smoke", "ajax_F1_temperature"]);
}

#[tokio::test]
async fn test_setup_reads_repeated_device_once() {
    let api = ScriptedApi {
        repeat_device_refs: true,
        ..ScriptedApi::with_hub("DISARMED")
    }
    .device("F1", Some(fire_detector()));

    let (api, _registry, integration) = setup(api, &config()).await;

    assert_eq!(api.device_reads(), 1);
    assert_eq!(integration.devices("H1").len(), 1);
    let ids: Vec<String> = integration
        .snapshots()
        .await
        .into_iter()
        .map(|s| s.unique_id)
        .collect();
    assert_eq!(ids, vec!["ajax_H1_alarm", "ajax_F1_smoke", "ajax_F1_temperature"]);
}

#[tokio::test]
async fn test_setup_rejects_zero_scan_interval() {
    let api = Arc::new(ScriptedApi::with_hub("DISARMED"));
    let registry = Arc::new(EventRegistry::new(8));
    let mut rx = registry.subscribe();
    let config = BridgeConfig::builder().alarm_scan_interval_ms(0).build();

    let result = AjaxIntegration::setup(&config, Arc::clone(&api), registry).await;

    assert!(
        matches!(result, Err(AjaxError::InvalidConfig { .. })),
        "expected InvalidConfig"
    );
    assert_eq!(api.hub_reads(), 0);
    assert!(rx.try_recv().is_err(), "no entities may be registered");
}

#[tokio::test]
async fn test_unknown_device_type_is_not_a_setup_failure() {
    let api = ScriptedApi::with_hub("DISARMED").device(
        "K1",
        Some(json!({ "id": "K1", "deviceName": "Keypad", "deviceType": "KeyPadPlus" })),
    );

    let (_api, _registry, integration) = setup(api, &config()).await;

    let snapshots = integration.snapshots().await;
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots[1..].iter().all(|s| s.device_class.is_none()));
}

// ── Scheduled refresh ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_schedules_follow_intervals() {
    let api = ScriptedApi::with_hub("DISARMED").device("F1", Some(fire_detector()));
    let (api, registry, mut integration) = setup(api, &config()).await;
    let mut rx = registry.subscribe();

    assert_eq!(api.hub_reads(), 1);
    assert_eq!(api.device_reads(), 1);

    integration.start();
    assert!(integration.is_running());

    // Sensors refresh immediately, the panel waits for its first 15 s tick.
    sleep(Duration::from_secs(1)).await;
    assert_eq!(api.hub_reads(), 1);
    assert_eq!(api.device_reads(), 3);

    sleep(Duration::from_secs(15)).await;
    assert_eq!(api.hub_reads(), 2);
    assert_eq!(api.device_reads(), 3);

    sleep(Duration::from_secs(15)).await;
    assert_eq!(api.hub_reads(), 3);
    assert_eq!(api.device_reads(), 5);

    let mut refreshed = 0;
    while let Ok(event) = rx.try_recv() {
        assert!(matches!(event, BridgeEvent::StateChanged(_)));
        refreshed += 1;
    }
    assert_eq!(refreshed, 6);

    integration.unload().await;
    let reads = api.hub_reads();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(api.hub_reads(), reads);
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_preserves_state() {
    let (api, registry, mut integration) =
        setup(ScriptedApi::with_hub("ARMED_NIGHT_MODE_ON"), &config()).await;
    let mut rx = registry.subscribe();
    let reconciler = Arc::clone(integration.reconciler());
    assert_eq!(reconciler.alarm_state("H1").await, Some(AlarmState::ArmedNight));

    api.set_hub_state(None);
    integration.start();
    sleep(Duration::from_secs(16)).await;

    assert_eq!(api.hub_reads(), 2);
    assert_eq!(reconciler.alarm_state("H1").await, Some(AlarmState::ArmedNight));
    assert!(rx.try_recv().is_err(), "an empty read must not propagate");

    api.set_hub_state(Some("DISARMED"));
    sleep(Duration::from_secs(15)).await;
    assert_eq!(reconciler.alarm_state("H1").await, Some(AlarmState::Disarmed));
    assert!(matches!(rx.try_recv(), Ok(BridgeEvent::StateChanged(_))));
}

#[tokio::test(start_paused = true)]
async fn test_device_read_failure_preserves_state() {
    let api = ScriptedApi::with_hub("DISARMED").device("F1", Some(fire_detector()));
    let (api, _registry, integration) = setup(api, &config()).await;
    let reconciler = integration.reconciler();

    reconciler.refresh_all().await;
    let before = reconciler.snapshot("ajax_F1_temperature").await.unwrap();
    assert_eq!(before.state, EntityState::Numeric(Some(21.0)));

    api.set_device("F1", None);
    reconciler.refresh_all().await;

    let after = reconciler.snapshot("ajax_F1_temperature").await.unwrap();
    assert_eq!(after.state, before.state);
    assert_eq!(after.last_updated, before.last_updated);
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_disarm_confirmed_after_settle_delay() {
    let api = ScriptedApi {
        apply_after: Duration::from_millis(400),
        ..ScriptedApi::with_hub("ARMED")
    };
    let (api, _registry, integration) = setup(api, &config()).await;

    let start = Instant::now();
    let state = integration.command("H1", AlarmCommand::Disarm).await.unwrap();

    assert_eq!(state, AlarmState::Disarmed);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(api.writes.lock().unwrap().as_slice(), &[AlarmCommand::Disarm]);
    assert_eq!(api.hub_reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_short_settle_may_report_previous_state() {
    let api = ScriptedApi {
        apply_after: Duration::from_secs(3),
        ..ScriptedApi::with_hub("ARMED")
    };
    let config = BridgeConfig::builder().settle_delay_ms(1000).build();
    let (_api, _registry, integration) = setup(api, &config).await;

    let state = integration.command("H1", AlarmCommand::Disarm).await.unwrap();
    assert_eq!(state, AlarmState::ArmedAway);

    // The next scheduled refresh picks the new mode up.
    sleep(Duration::from_secs(3)).await;
    integration.reconciler().refresh_panels().await;
    assert_eq!(
        integration.reconciler().alarm_state("H1").await,
        Some(AlarmState::Disarmed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_arm_night() {
    let (api, _registry, integration) = setup(ScriptedApi::with_hub("DISARMED"), &config()).await;
    let state = integration.command("H1", AlarmCommand::ArmNight).await.unwrap();
    assert_eq!(state, AlarmState::ArmedNight);
    assert_eq!(api.writes.lock().unwrap().as_slice(), &[AlarmCommand::ArmNight]);
}

#[tokio::test(start_paused = true)]
async fn test_command_failure_is_returned_without_retry() {
    let api = ScriptedApi::with_hub("DISARMED");
    api.write_failures.lock().unwrap().push_back(503);
    let (api, _registry, integration) = setup(api, &config()).await;

    let err = integration.command("H1", AlarmCommand::ArmAway).await.unwrap_err();

    assert!(matches!(err, AjaxError::Api { status: 503, .. }));
    assert_eq!(api.write_count(), 1);
    // No settle refresh after a failed write.
    assert_eq!(api.hub_reads(), 1);
    assert_eq!(
        integration.reconciler().alarm_state("H1").await,
        Some(AlarmState::Disarmed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_command_retry_policy() {
    let api = ScriptedApi::with_hub("DISARMED");
    api.write_failures.lock().unwrap().extend([503, 502]);
    let config = BridgeConfig::builder()
        .command_retry(CommandRetry {
            attempts: 2,
            delay_ms: 500,
        })
        .build();
    let (api, _registry, integration) = setup(api, &config).await;

    let state = integration.command("H1", AlarmCommand::ArmAway).await.unwrap();

    assert_eq!(state, AlarmState::ArmedAway);
    assert_eq!(api.write_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_command_retry_skips_permanent_errors() {
    let api = ScriptedApi::with_hub("DISARMED");
    api.write_failures.lock().unwrap().push_back(403);
    let config = BridgeConfig::builder()
        .command_retry(CommandRetry {
            attempts: 3,
            delay_ms: 500,
        })
        .build();
    let (api, _registry, integration) = setup(api, &config).await;

    let err = integration.command("H1", AlarmCommand::Disarm).await.unwrap_err();
    assert!(matches!(err, AjaxError::Api { status: 403, .. }));
    assert_eq!(api.write_count(), 1);
}

#[tokio::test]
async fn test_command_unknown_hub() {
    let (api, _registry, integration) = setup(ScriptedApi::with_hub("DISARMED"), &config()).await;
    let err = integration.command("H2", AlarmCommand::Disarm).await.unwrap_err();
    assert!(matches!(err, AjaxError::UnknownHub { ref hub_id } if hub_id == "H2"));
    assert_eq!(api.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_command_and_refresh_do_not_interleave() {
    let api = ScriptedApi {
        apply_after: Duration::ZERO,
        ..ScriptedApi::with_hub("ARMED")
    };
    let (api, registry, mut integration) = setup(api, &config()).await;
    let mut rx = registry.subscribe();
    integration.start();

    // The panel's scheduled tick (15 s) falls inside the settle window; it
    // must wait for the command to finish rather than read mid-command.
    sleep(Duration::from_millis(14_500)).await;
    let state = integration.command("H1", AlarmCommand::Disarm).await.unwrap();
    assert_eq!(state, AlarmState::Disarmed);

    sleep(Duration::from_millis(100)).await;
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BridgeEvent::StateChanged(s) = event {
            states.push(s.state);
        }
    }
    assert_eq!(
        states,
        vec![
            EntityState::Alarm(AlarmState::Disarmed),
            EntityState::Alarm(AlarmState::Disarmed)
        ]
    );
    assert_eq!(api.hub_reads(), 3);
}
