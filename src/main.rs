// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use url::Url;

use ajax_cloud_bridge::{
    AjaxHttpClient, AjaxIntegration, AlarmCommand, BridgeConfig, BridgeEvent, CommandRetry,
    EntitySnapshot, EventRegistry, MissingFlag,
};

type Integration = AjaxIntegration<AjaxHttpClient>;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ajax2mqtt")]
#[command(about = "Bridge between the Ajax Systems cloud and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    ajax: AjaxToml,
    #[serde(default)]
    polling: PollingToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct AjaxToml {
    api_key: String,
    session_token: String,
    user_id: String,
    #[serde(default = "default_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_request_timeout")]
    request_timeout_ms: u64,
}

fn default_api_base_url() -> String {
    ajax_cloud_bridge::config::DEFAULT_API_BASE_URL.to_string()
}
fn default_request_timeout() -> u64 {
    10000
}

#[derive(Debug, Deserialize)]
struct PollingToml {
    #[serde(default = "default_alarm_scan_interval")]
    alarm_scan_interval_ms: u64,
    #[serde(default = "default_sensor_scan_interval")]
    sensor_scan_interval_ms: u64,
    #[serde(default = "default_settle_delay")]
    settle_delay_ms: u64,
    #[serde(default)]
    command_retries: u32,
    #[serde(default = "default_command_retry_delay")]
    command_retry_delay_ms: u64,
    #[serde(default)]
    fire_missing_flag: MissingFlag,
    #[serde(default)]
    door_missing_flag: MissingFlag,
}

impl Default for PollingToml {
    fn default() -> Self {
        Self {
            alarm_scan_interval_ms: default_alarm_scan_interval(),
            sensor_scan_interval_ms: default_sensor_scan_interval(),
            settle_delay_ms: default_settle_delay(),
            command_retries: 0,
            command_retry_delay_ms: default_command_retry_delay(),
            fire_missing_flag: MissingFlag::default(),
            door_missing_flag: MissingFlag::default(),
        }
    }
}

fn default_alarm_scan_interval() -> u64 {
    15000
}
fn default_sensor_scan_interval() -> u64 {
    30000
}
fn default_settle_delay() -> u64 {
    1000
}
fn default_command_retry_delay() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "ajax-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "ajax/cmd".to_string()
}
fn default_publish_topic() -> String {
    "ajax".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

fn build_bridge_config(ajax: &AjaxToml, polling: &PollingToml) -> BridgeConfig {
    BridgeConfig::builder()
        .api_base_url(&ajax.api_base_url)
        .api_key(&ajax.api_key)
        .session_token(&ajax.session_token)
        .user_id(&ajax.user_id)
        .request_timeout_ms(ajax.request_timeout_ms)
        .alarm_scan_interval_ms(polling.alarm_scan_interval_ms)
        .sensor_scan_interval_ms(polling.sensor_scan_interval_ms)
        .settle_delay_ms(polling.settle_delay_ms)
        .command_retry(CommandRetry {
            attempts: polling.command_retries,
            delay_ms: polling.command_retry_delay_ms,
        })
        .fire_missing_flag(polling.fire_missing_flag)
        .door_missing_flag(polling.door_missing_flag)
        .build()
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    parse_config(&text)
}

fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text).context("Failed to parse config file")?;
    anyhow::ensure!(
        config.mqtt.snapshot_interval_secs > 0,
        "mqtt.snapshot_interval_secs must be greater than zero"
    );
    build_bridge_config(&config.ajax, &config.polling).validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share the {now, op, ...} flat structure

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: String,
    state: MqttSnapshotState,
}

#[derive(Serialize)]
struct MqttSnapshotState {
    entities: Vec<EntitySnapshot>,
}

// Entity refresh: {now, op, entity}
#[derive(Serialize)]
struct MqttEntityEvent {
    now: u64,
    op: String,
    entity: EntitySnapshot,
}

// Entities withdrawn on unload: {now, op, ids}
#[derive(Serialize)]
struct MqttRemovedEvent {
    now: u64,
    op: String,
    ids: Vec<String>,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    #[allow(dead_code)]
    op_id: Option<String>,
    #[serde(default)]
    hub: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

fn build_snapshot(entities: Vec<EntitySnapshot>) -> MqttSnapshot {
    MqttSnapshot {
        now: now_epoch_ms(),
        op: "SNAPSHOT".to_string(),
        state: MqttSnapshotState { entities },
    }
}

async fn publish_snapshot(client: &AsyncClient, topic: &str, ajax: &Integration) {
    let snapshot = build_snapshot(ajax.snapshots().await);
    publish_json(client, topic, &snapshot, true).await;
}

/// Run `publish` every `period`. The first immediate tick is skipped because
/// registration already published a snapshot.
fn spawn_snapshot_timer<F, Fut>(period: Duration, mut publish: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            publish().await;
        }
    })
}

// ---------------------------------------------------------------------------
// Bridge event → MQTT
// ---------------------------------------------------------------------------

async fn handle_bridge_event(event: BridgeEvent, client: &AsyncClient, topic: &str) {
    match event {
        BridgeEvent::EntitiesAdded(entities) => {
            info!("{} entities registered, publishing snapshot", entities.len());
            publish_json(client, topic, &build_snapshot(entities), true).await;
        }

        BridgeEvent::StateChanged(entity) => {
            debug!("{} refreshed", entity.unique_id);
            let msg = MqttEntityEvent {
                now: now_epoch_ms(),
                op: "ENTITY_STATE".to_string(),
                entity,
            };
            publish_json(client, topic, &msg, false).await;
        }

        BridgeEvent::EntitiesRemoved(ids) => {
            info!("{} entities removed", ids.len());
            let msg = MqttRemovedEvent {
                now: now_epoch_ms(),
                op: "ENTITIES_REMOVED".to_string(),
                ids,
            };
            publish_json(client, topic, &msg, false).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

/// Pick the target hub: the one named in the command, or the only hub.
fn resolve_hub(cmd: &MqttCommand, ajax: &Integration) -> Option<String> {
    if let Some(hub) = &cmd.hub {
        return Some(hub.clone());
    }
    let mut hubs = ajax.hub_ids();
    match (hubs.next(), hubs.next()) {
        (Some(only), None) => Some(only.to_string()),
        _ => None,
    }
}

/// Run an alarm command and log the result. Returns the ack payload on success.
async fn exec_alarm_cmd(
    ajax: &Integration,
    hub_id: &str,
    command: AlarmCommand,
) -> Option<serde_json::Value> {
    match ajax.command(hub_id, command).await {
        Ok(state) => {
            info!("{command} hub {hub_id}: now {state}");
            Some(serde_json::json!({ "hub": hub_id, "state": state }))
        }
        Err(e) => {
            error!("{command} hub {hub_id} failed: {e}");
            None
        }
    }
}

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    ajax: &Integration,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    match cmd.op.as_str() {
        "SNAPSHOT" => {
            debug!("Command: SNAPSHOT");
            let snapshot = build_snapshot(ajax.snapshots().await);
            let snapshot_value = serde_json::to_value(&snapshot).ok();
            publish_json(client, topic, &snapshot, true).await;
            publish_cmd_ack(client, topic, true, src_json, snapshot_value).await;
        }

        "PING" => {
            info!("Command: PING");
            publish_cmd_ack(client, topic, true, src_json, None).await;
        }

        op => match AlarmCommand::from_op(op) {
            Some(command) => {
                let Some(hub_id) = resolve_hub(&cmd, ajax) else {
                    warn!("{op}: missing hub (account has several hubs)");
                    publish_cmd_ack(client, topic, false, src_json, None).await;
                    return;
                };
                info!("Command: {op} hub {hub_id}");
                let data = exec_alarm_cmd(ajax, &hub_id, command).await;
                publish_cmd_ack(client, topic, data.is_some(), src_json, data).await;
            }
            None => {
                warn!("Unknown command: {op}");
                publish_cmd_ack(client, topic, false, src_json, None).await;
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=ajax_cloud_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let bridge_config = build_bridge_config(&config.ajax, &config.polling);
        let publish_topic = config.mqtt.publish_topic.clone();
        let subscribe_topic = config.mqtt.subscribe_topic.clone();

        // Set up MQTT first so the registration snapshot has somewhere to go
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        client
            .subscribe(&subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to MQTT topic")?;
        info!("MQTT: subscribed to {subscribe_topic}");

        // Connect to the Ajax cloud and discover hubs/devices
        info!("Connecting to Ajax cloud at {}", bridge_config.api_base_url);
        let api = Arc::new(
            AjaxHttpClient::new(&bridge_config).context("Failed to build Ajax API client")?,
        );
        let registry = Arc::new(EventRegistry::new(256));
        let event_rx = registry.subscribe();
        let mut integration = AjaxIntegration::setup(&bridge_config, api, registry)
            .await
            .context("Ajax setup failed")?;
        integration.start();
        let ajax = Arc::new(integration);
        info!("Ajax integration running");

        // Task 1: Bridge event listener
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let mut event_handle = tokio::spawn(async move {
            let mut rx = event_rx;
            loop {
                match rx.recv().await {
                    Ok(event) => handle_bridge_event(event, &client_events, &topic_events).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, forwards commands)
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<(String, MqttCommand)>(32);
        let client_loop = client.clone();
        let sub_topic = subscribe_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_loop.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    if cmd.op == "SNAPSHOT" {
                                        debug!("MQTT command received: {payload}");
                                    } else {
                                        info!("MQTT command received: {payload}");
                                    }
                                    if cmd_tx.send((payload, cmd)).await.is_err() {
                                        warn!("Command handler stopped, dropping command");
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: Command handler (commands run one at a time, in arrival order)
        let ajax_cmds = Arc::clone(&ajax);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let cmd_handle = tokio::spawn(async move {
            while let Some((payload, cmd)) = cmd_rx.recv().await {
                handle_command(&payload, cmd, &client_cmds, &topic_cmds, &ajax_cmds).await;
            }
        });

        // Task 4: Snapshot timer
        let ajax_snap = Arc::clone(&ajax);
        let client_snap = client.clone();
        let topic_snap = publish_topic.clone();
        let snap_handle = spawn_snapshot_timer(
            Duration::from_secs(config.mqtt.snapshot_interval_secs),
            move || {
                let ajax = Arc::clone(&ajax_snap);
                let client = client_snap.clone();
                let topic = topic_snap.clone();
                async move { publish_snapshot(&client, &topic, &ajax).await }
            },
        );

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting...");
                true
            }
        };

        // Stop the tasks holding the integration and wait so their handles are dropped
        cmd_handle.abort();
        snap_handle.abort();
        let _ = cmd_handle.await;
        let _ = snap_handle.await;

        // Unload the integration (stops refresh jobs, withdraws entities)
        match Arc::try_unwrap(ajax) {
            Ok(integration) => integration.unload().await,
            Err(_arc) => {
                warn!("Could not unwrap integration Arc for clean unload (tasks still hold references)");
            }
        }

        // The listener exits once the last registry handle is gone; give it a
        // moment to publish the removal before the MQTT loop stops.
        if tokio::time::timeout(Duration::from_secs(2), &mut event_handle).await.is_err() {
            event_handle.abort();
        }
        mqtt_handle.abort();

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                Ok((new_host, new_port)) => {
                    config = new_config;
                    mqtt_host = new_host;
                    mqtt_port = new_port;
                    info!("Config reloaded successfully");
                }
                Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }

        info!("Restarting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port). The port
/// defaults to 1883.
fn parse_mqtt_url(raw: &str) -> Result<(String, u16)> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("mqtt://{raw}")
    };
    let url = Url::parse(&with_scheme).context("MQTT URL must be in format mqtt://host:port")?;
    anyhow::ensure!(
        matches!(url.scheme(), "mqtt" | "tcp"),
        "Unsupported MQTT URL scheme: {}",
        url.scheme()
    );
    let host = url.host_str().context("MQTT URL has no host")?;
    Ok((host.to_string(), url.port().unwrap_or(1883)))
}
