// MIT License - Copyright (c) 2026 Peter Wright
// Bridge configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::{AjaxError, Result};

/// Default Ajax cloud API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.ajax.systems/api";

/// How a composite alarm flag treats a raw boolean field that is absent
/// from the device payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFlag {
    /// Absent field counts as "no alarm" (default)
    #[default]
    NotTriggered,
    /// Absent field counts as "alarm"
    Triggered,
}

impl MissingFlag {
    /// Resolve an optional raw flag to a definite value.
    pub fn resolve(self, raw: Option<bool>) -> bool {
        raw.unwrap_or(self == MissingFlag::Triggered)
    }
}

/// Missing-field policy per sensor family that has a composite flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagPolicies {
    pub fire: MissingFlag,
    pub door: MissingFlag,
}

/// Retry policy for arm/disarm writes.
///
/// With `attempts = 0` a failed write is surfaced immediately. Only
/// retryable errors (see `AjaxError::is_retryable`) are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRetry {
    /// Extra attempts after the first failure
    pub attempts: u32,
    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for CommandRetry {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay_ms: 1000,
        }
    }
}

/// Configuration for talking to the Ajax cloud and running the poll loop.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// API root URL (default: https://api.ajax.systems/api)
    pub api_base_url: String,
    /// Vendor API key sent as `X-Api-Key`
    pub api_key: String,
    /// Session token sent as `X-Session-Token`
    pub session_token: String,
    /// Account user id used in every resource path
    pub user_id: String,
    /// Total HTTP request timeout in milliseconds (default: 10000)
    pub request_timeout_ms: u64,
    /// Alarm panel refresh interval in milliseconds (default: 15000)
    pub alarm_scan_interval_ms: u64,
    /// Refresh interval for every other entity in milliseconds (default: 30000)
    pub sensor_scan_interval_ms: u64,
    /// Wait between an arm/disarm write and the confirming refresh (default: 1000)
    pub settle_delay_ms: u64,
    /// Retry policy for arm/disarm writes
    pub command_retry: CommandRetry,
    /// Missing-field policy for composite alarm flags
    pub flag_policies: FlagPolicies,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: String::new(),
            session_token: String::new(),
            user_id: String::new(),
            request_timeout_ms: 10000,
            alarm_scan_interval_ms: 15000,
            sensor_scan_interval_ms: 30000,
            settle_delay_ms: 1000,
            command_retry: CommandRetry::default(),
            flag_policies: FlagPolicies::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn alarm_scan_interval(&self) -> Duration {
        Duration::from_millis(self.alarm_scan_interval_ms)
    }

    pub fn sensor_scan_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_scan_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Reject values the scheduler and HTTP client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("alarm_scan_interval_ms", self.alarm_scan_interval_ms),
            ("sensor_scan_interval_ms", self.sensor_scan_interval_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(AjaxError::InvalidConfig {
                    details: format!("{name} must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}

/// Builder for BridgeConfig.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.config.session_token = token.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.config.user_id = user_id.into();
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn alarm_scan_interval_ms(mut self, ms: u64) -> Self {
        self.config.alarm_scan_interval_ms = ms;
        self
    }

    pub fn sensor_scan_interval_ms(mut self, ms: u64) -> Self {
        self.config.sensor_scan_interval_ms = ms;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn command_retry(mut self, retry: CommandRetry) -> Self {
        self.config.command_retry = retry;
        self
    }

    pub fn fire_missing_flag(mut self, policy: MissingFlag) -> Self {
        self.config.flag_policies.fire = policy;
        self
    }

    pub fn door_missing_flag(mut self, policy: MissingFlag) -> Self {
        self.config.flag_policies.door = policy;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
