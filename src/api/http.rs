// MIT License - Copyright (c) 2026 Peter Wright
// Ajax cloud REST client

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{AjaxApi, AlarmCommand};
use crate::config::BridgeConfig;
use crate::devices::{Device, DeviceRef, Hub, HubRef};
use crate::error::{AjaxError, Result};

const API_KEY_HEADER: &str = "x-api-key";
const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArmingRequest {
    command: &'static str,
    ignore_problems: bool,
}

/// HTTP client for the Ajax cloud API.
///
/// All resources live under `{base}/user/{userId}/hubs`. Authentication
/// is carried by default headers on the underlying `reqwest::Client`.
/// Ids are appended as single percent-encoded path segments.
#[derive(Debug, Clone)]
pub struct AjaxHttpClient {
    http: reqwest::Client,
    base_url: Url,
    user_id: String,
}

impl AjaxHttpClient {
    /// Build a client with auth headers and the request timeout from `config`.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            header_value(API_KEY_HEADER, &config.api_key)?,
        );
        headers.insert(
            HeaderName::from_static(SESSION_TOKEN_HEADER),
            header_value(SESSION_TOKEN_HEADER, &config.session_token)?,
        );

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("ajax2mqtt/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Self::with_client(http, &config.api_base_url, &config.user_id)
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &str, user_id: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(AjaxError::InvalidConfig {
                details: format!("API base URL {base_url} cannot carry a path"),
            });
        }
        Ok(Self {
            http,
            base_url,
            user_id: path_segment(user_id)?.to_string(),
        })
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/user/{userId}/hubs/{segments...}`
    fn hubs_url_with(&self, segments: &[&str]) -> Result<Url> {
        for segment in segments {
            path_segment(segment)?;
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AjaxError::InvalidConfig {
                details: format!("API base URL {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(["user", self.user_id.as_str(), "hubs"])
            .extend(segments);
        Ok(url)
    }

    fn hubs_url(&self) -> Result<Url> {
        self.hubs_url_with(&[])
    }

    fn hub_url(&self, hub_id: &str, tail: &[&str]) -> Result<Url> {
        let mut segments = Vec::with_capacity(tail.len() + 1);
        segments.push(hub_id);
        segments.extend_from_slice(tail);
        self.hubs_url_with(&segments)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get_json(&self, url: Url) -> Result<Value> {
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AjaxError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn put_arming(&self, hub_id: &str, command: AlarmCommand) -> Result<()> {
        let url = self.hub_url(hub_id, &["commands", "arming"])?;
        debug!("PUT {url} command={}", command.wire_command());
        let body = ArmingRequest {
            command: command.wire_command(),
            ignore_problems: true,
        };
        let resp = self.http.put(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AjaxError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    // ── Typed reads (errors surfaced) ────────────────────────────────

    pub async fn fetch_hubs(&self) -> Result<Vec<HubRef>> {
        let value = self.get_json(self.hubs_url()?).await?;
        serde_json::from_value(value).map_err(|e| AjaxError::Decode {
            details: format!("hub list: {e}"),
        })
    }

    pub async fn fetch_hub_info(&self, hub_id: &str) -> Result<Option<Hub>> {
        let value = self.get_json(self.hub_url(hub_id, &[])?).await?;
        Ok(non_empty_object(&value).then(|| Hub::from_payload(hub_id, &value)))
    }

    pub async fn fetch_hub_devices(&self, hub_id: &str) -> Result<Vec<DeviceRef>> {
        let value = self.get_json(self.hub_url(hub_id, &["devices"])?).await?;
        serde_json::from_value(value).map_err(|e| AjaxError::Decode {
            details: format!("device list for hub {hub_id}: {e}"),
        })
    }

    pub async fn fetch_device_info(&self, hub_id: &str, device_id: &str) -> Result<Option<Device>> {
        let url = self.hub_url(hub_id, &["devices", device_id])?;
        let value = self.get_json(url).await?;
        Ok(Device::from_payload(hub_id, value))
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value).map_err(|_| AjaxError::InvalidConfig {
        details: format!("{name} contains characters not allowed in a header"),
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Accept an id as one path segment. Empty and dot segments would change
/// which resource the URL names.
fn path_segment(id: &str) -> Result<&str> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(AjaxError::InvalidId { id: id.to_string() });
    }
    Ok(id)
}

fn non_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| !map.is_empty())
}

impl AjaxApi for AjaxHttpClient {
    async fn get_hubs(&self) -> Vec<HubRef> {
        let start = Instant::now();
        match self.fetch_hubs().await {
            Ok(hubs) => {
                debug!("Listed {} hubs in {:?}", hubs.len(), start.elapsed());
                hubs
            }
            Err(e) => {
                warn!("Failed to list hubs: {e}");
                Vec::new()
            }
        }
    }

    async fn get_hub_info(&self, hub_id: &str) -> Option<Hub> {
        match self.fetch_hub_info(hub_id).await {
            Ok(hub) => hub,
            Err(e) if e.is_not_found() => {
                warn!("Hub {hub_id} not found");
                None
            }
            Err(e) => {
                warn!("Failed to read hub {hub_id}: {e}");
                None
            }
        }
    }

    async fn get_hub_devices(&self, hub_id: &str) -> Vec<DeviceRef> {
        match self.fetch_hub_devices(hub_id).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to list devices of hub {hub_id}: {e}");
                Vec::new()
            }
        }
    }

    async fn get_device_info(&self, hub_id: &str, device_id: &str) -> Option<Device> {
        match self.fetch_device_info(hub_id, device_id).await {
            Ok(device) => device,
            Err(e) if e.is_not_found() => {
                debug!("Device {device_id} on hub {hub_id} not found, treating as removed");
                None
            }
            Err(e) => {
                warn!("Failed to read device {device_id} on hub {hub_id}: {e}");
                None
            }
        }
    }

    async fn arm_hub(&self, hub_id: &str) -> Result<()> {
        self.put_arming(hub_id, AlarmCommand::ArmAway).await
    }

    async fn arm_hub_night(&self, hub_id: &str) -> Result<()> {
        self.put_arming(hub_id, AlarmCommand::ArmNight).await
    }

    async fn disarm_hub(&self, hub_id: &str) -> Result<()> {
        self.put_arming(hub_id, AlarmCommand::Disarm).await
    }
}
