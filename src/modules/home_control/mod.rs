//! Home automation capability module
//!
//! Parses spoken commands against the [`DeviceRegistry`], sends them over
//! HTTP or MQTT and keeps the cached status in step. Device failures come
//! back as failed module results and never abort the pipeline.

mod client;
mod device;
pub mod parser;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::HomeConfig;
use crate::error::DeviceError;
use crate::modules::{CapabilityModule, ModuleArgs, ModuleResult, SideEffect, TriggerPatterns};
use crate::{Error, Result};

pub use client::{DeviceClient, DeviceReport};
pub use device::{Action, Device, DeviceSummary, DeviceType, MqttAuth, MqttSettings, Protocol};
pub use registry::{DeviceRegistry, RegistryFile};

/// Module id used for routing
pub const MODULE_ID: &str = "home_control";

const TRIGGERS: &[&str] = &[
    r"\b(turn|switch|power)\s+(the\s+)?\w*\s*(on|off)\b",
    r"\b(turn|switch|power)\b.*\b(on|off)\s*[.!]?$",
    r"\btoggle\b",
    r"\bdim\b",
    r"\bbrightness\b",
    r"\bthermostat\b",
    r"\bset\b.*\btemperature\b",
    r"\b(list|what|which)\b.*\bdevices\b",
];

const LIST_PATTERN: &str = r"(?i)\b(list|what|which)\b.*\bdevices\b";

/// Controls smart-home devices
pub struct HomeControlModule {
    registry: Arc<DeviceRegistry>,
    client: DeviceClient,
    patterns: TriggerPatterns,
    list_pattern: regex::Regex,
    optimistic_ttl: Duration,
}

impl std::fmt::Debug for HomeControlModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeControlModule")
            .field("registry", &self.registry.path())
            .field("optimistic_ttl", &self.optimistic_ttl)
            .finish_non_exhaustive()
    }
}

impl HomeControlModule {
    /// Create the module over a shared registry
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(registry: Arc<DeviceRegistry>, config: &HomeConfig) -> Result<Self> {
        let list_pattern = regex::Regex::new(LIST_PATTERN)
            .map_err(|e| Error::Config(format!("invalid trigger pattern: {e}")))?;

        Ok(Self {
            registry,
            client: DeviceClient::new(config.http_timeout, config.mqtt_timeout)?,
            patterns: TriggerPatterns::new(TRIGGERS)?,
            list_pattern,
            optimistic_ttl: config.optimistic_ttl,
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Send `action` to a device by id
    ///
    /// Serialized per device. On success the cached status is updated and
    /// persisted; on failure the registry is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `DeviceError` if the device is unknown, refuses the action or
    /// cannot be reached
    pub async fn control(&self, id: &str, action: Action) -> std::result::Result<Device, DeviceError> {
        let _guard = self
            .registry
            .lock_device(id)
            .await
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;

        let device = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;

        if !device.device_type.allows(&action) {
            return Err(DeviceError::UnsupportedAction {
                device: device.spoken_name(),
                action: action.describe().to_string(),
            });
        }

        let action = match action {
            Action::Toggle => self.resolve_toggle(&device).await,
            other => other,
        };

        let report = self.client.send(&device, &action).await.inspect_err(|e| {
            tracing::warn!(device = %id, error = %e, "device command failed");
        })?;

        let optimistic_until = match device.protocol {
            Protocol::Mqtt => chrono::Duration::from_std(self.optimistic_ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl),
            Protocol::Http => None,
        };

        let updated = self
            .registry
            .update(id, |d| {
                action.apply_to(d);
                report.apply_to(d);
                d.optimistic_until = optimistic_until;
            })
            .await
            .map_err(|e| match e {
                Error::Device(device_error) => device_error,
                other => {
                    tracing::error!(device = %id, error = %other, "failed to persist device registry");
                    DeviceError::ProtocolError(format!("status not saved: {other}"))
                }
            })?;

        tracing::info!(device = %id, status = ?updated.status, "device controlled");
        Ok(updated)
    }

    /// Re-read a device's state and reconcile the cache
    ///
    /// # Errors
    ///
    /// Returns `DeviceError` if the device is unknown or the query fails
    pub async fn refresh(&self, id: &str) -> std::result::Result<Device, DeviceError> {
        let _guard = self
            .registry
            .lock_device(id)
            .await
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;

        let device = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;

        let report = self.client.fetch(&device).await?;
        let now = Utc::now();

        if report.is_none() && device.is_optimistic(now) {
            return Ok(device);
        }

        self.registry
            .update(id, |d| {
                if let Some(report) = &report {
                    report.apply_to(d);
                }
                d.optimistic_until = None;
            })
            .await
            .map_err(|e| match e {
                Error::Device(device_error) => device_error,
                other => DeviceError::ProtocolError(format!("status not saved: {other}")),
            })
    }

    /// On or off, from a live reading when the device can be queried
    async fn resolve_toggle(&self, device: &Device) -> Action {
        let status = match self.client.fetch(device).await {
            Ok(Some(report)) if report.status.is_some() => report.status,
            Ok(_) => device.status.clone(),
            Err(e) => {
                tracing::warn!(device = %device.id, error = %e, "status read failed, using cached value");
                device.status.clone()
            }
        };
        if status.as_deref() == Some("on") {
            Action::Off
        } else {
            Action::On
        }
    }

    async fn list_devices(&self) -> ModuleResult {
        let devices = self.registry.snapshot().await;
        if devices.is_empty() {
            return ModuleResult::reply(MODULE_ID, "No devices are configured.");
        }

        let lines: Vec<String> = devices
            .iter()
            .map(|d| {
                format!(
                    "{} ({}) is {}",
                    d.spoken_name(),
                    d.device_type.as_str(),
                    d.status.as_deref().unwrap_or("unknown")
                )
            })
            .collect();
        ModuleResult::context(MODULE_ID, lines.join("\n"))
    }
}

/// Spoken message for a device failure
#[must_use]
pub fn failure_message(error: &DeviceError, device: Option<&str>) -> String {
    let name = device.unwrap_or("device");
    match error {
        DeviceError::NotFound(_) => error.to_string(),
        DeviceError::UnsupportedAction { device, action } => {
            format!("Sorry, the {device} can't {action}.")
        }
        DeviceError::ProtocolError(_) => format!("Sorry, I couldn't control the {name}."),
        DeviceError::Timeout(_) => format!("Sorry, the {name} didn't respond in time."),
    }
}

#[async_trait]
impl CapabilityModule for HomeControlModule {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn description(&self) -> &str {
        "Turns lights, switches and other smart-home devices on or off, sets brightness and temperature, lists devices"
    }

    fn patterns(&self) -> &TriggerPatterns {
        &self.patterns
    }

    async fn handle(&self, args: &ModuleArgs) -> Result<ModuleResult> {
        if self.list_pattern.is_match(&args.text) {
            return Ok(self.list_devices().await);
        }

        let Some(command) = parser::parse_command(&args.text) else {
            return Ok(ModuleResult::failure(
                MODULE_ID,
                "I'm not sure what you'd like me to do with that device.",
            ));
        };

        let devices = self.registry.snapshot().await;
        let Some(target) = parser::resolve(&args.text, &command.reference, &devices) else {
            let reference = if command.reference.is_empty() {
                args.text.clone()
            } else {
                command.reference.clone()
            };
            tracing::debug!(reference = %reference, "no device matched");
            let error = DeviceError::NotFound(reference);
            return Ok(ModuleResult::failure(MODULE_ID, failure_message(&error, None)));
        };

        let spoken = target.spoken_name();
        match self.control(&target.id, command.action).await {
            Ok(device) => Ok(ModuleResult::reply(MODULE_ID, command.action.confirmation(&device))
                .with_effect(SideEffect::DeviceStatus {
                    device_id: device.id.clone(),
                    status: serde_json::to_value(device.summary())?,
                })),
            Err(e) => Ok(ModuleResult::failure(MODULE_ID, failure_message(&e, Some(&spoken)))),
        }
    }
}
