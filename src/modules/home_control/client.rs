//! HTTP and MQTT transports for device control

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{Map, Value};

use crate::error::DeviceError;

use super::device::{Action, Device, MqttSettings, Protocol};

/// What a device reported back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceReport {
    pub status: Option<String>,
    pub attributes: Map<String, Value>,
}

impl DeviceReport {
    /// Read `status` and known level fields from a device answer
    ///
    /// A status is taken only when it is `on` or `off`, either from a JSON
    /// `status` field or as the whole body. Acknowledgements such as `OK`
    /// report nothing.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => {
                let status = map.get("status").and_then(Value::as_str).and_then(power_state);
                let attributes = ["brightness", "temperature"]
                    .iter()
                    .filter_map(|k| map.get(*k).map(|v| ((*k).to_string(), v.clone())))
                    .collect();
                Self { status, attributes }
            }
            Ok(Value::String(s)) => Self {
                status: power_state(&s),
                attributes: Map::new(),
            },
            Ok(_) => Self::default(),
            Err(_) => Self {
                status: std::str::from_utf8(body).ok().and_then(power_state),
                attributes: Map::new(),
            },
        }
    }

    /// Merge into a cached device record
    pub fn apply_to(&self, device: &mut Device) {
        if let Some(status) = &self.status {
            device.status = Some(status.clone());
        }
        for (key, value) in &self.attributes {
            device.attributes.insert(key.clone(), value.clone());
        }
    }
}

/// Normalized `on`/`off`, or `None` for anything else
fn power_state(raw: &str) -> Option<String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" => Some("on".to_string()),
        "off" => Some("off".to_string()),
        _ => None,
    }
}

/// Sends commands to devices over their configured protocol
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    http_timeout: Duration,
    mqtt_timeout: Duration,
}

impl DeviceClient {
    /// Create a client with per-protocol timeouts
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(http_timeout: Duration, mqtt_timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self {
            http,
            http_timeout,
            mqtt_timeout,
        })
    }

    /// Send an action; Ok means the device or broker acknowledged it
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` on a non-2xx answer or transport failure,
    /// `Timeout` when no answer arrives in time
    pub async fn send(&self, device: &Device, action: &Action) -> Result<DeviceReport, DeviceError> {
        let (name, params) = action.wire();
        let payload = serde_json::json!({ "action": name, "params": params });

        tracing::debug!(
            device = %device.id,
            protocol = %device.protocol,
            action = name,
            "sending device command"
        );

        match device.protocol {
            Protocol::Http => self.http_send(device, &payload).await,
            Protocol::Mqtt => {
                self.mqtt_publish(device, name, &payload).await?;
                Ok(DeviceReport::default())
            }
        }
    }

    /// Ask the device for its current state
    ///
    /// Returns `None` when the protocol has nothing to query, such as an
    /// MQTT device without a state topic.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` or `Timeout` when the query fails
    pub async fn fetch(&self, device: &Device) -> Result<Option<DeviceReport>, DeviceError> {
        match device.protocol {
            Protocol::Http => self.http_fetch(device).await.map(Some),
            Protocol::Mqtt => {
                let settings = mqtt_settings(device)?;
                match settings.state_topic.clone() {
                    Some(topic) => self.mqtt_read_retained(device, &settings, &topic).await.map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn url(device: &Device) -> Result<url::Url, DeviceError> {
        let raw = device
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| DeviceError::ProtocolError(format!("{} has no url", device.id)))?;
        let url = url::Url::parse(raw.trim())
            .map_err(|e| DeviceError::ProtocolError(format!("{} has an invalid url: {e}", device.id)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(DeviceError::ProtocolError(format!(
                "{} uses unsupported scheme {other}",
                device.id
            ))),
        }
    }

    fn map_http_error(&self, device: &Device, e: &reqwest::Error) -> DeviceError {
        if e.is_timeout() {
            DeviceError::Timeout(format!("{} after {:?}", device.id, self.http_timeout))
        } else {
            DeviceError::ProtocolError(format!("{}: {e}", device.id))
        }
    }

    async fn http_send(&self, device: &Device, payload: &Value) -> Result<DeviceReport, DeviceError> {
        let url = Self::url(device)?;
        let method = device
            .method
            .as_deref()
            .unwrap_or("PUT")
            .to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| DeviceError::ProtocolError(format!("invalid method: {e}")))?;

        let mut request = self.http.request(method, url).json(payload);
        for (name, value) in &device.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_http_error(device, &e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(device = %device.id, status = %status, "device rejected command");
            return Err(DeviceError::ProtocolError(format!(
                "{} answered {status}",
                device.id
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_http_error(device, &e))?;
        Ok(DeviceReport::parse(&body))
    }

    async fn http_fetch(&self, device: &Device) -> Result<DeviceReport, DeviceError> {
        let url = Self::url(device)?;
        let mut request = self.http.get(url);
        for (name, value) in &device.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_http_error(device, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::ProtocolError(format!(
                "{} answered {status}",
                device.id
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_http_error(device, &e))?;
        Ok(DeviceReport::parse(&body))
    }

    /// Publish at QoS 1 and wait for the broker's PUBACK
    async fn mqtt_publish(&self, device: &Device, action: &str, payload: &Value) -> Result<(), DeviceError> {
        let settings = mqtt_settings(device)?;
        let topic = settings
            .topic
            .clone()
            .unwrap_or_else(|| format!("home/{}/{action}", device.id));
        let body = serde_json::to_vec(payload)
            .map_err(|e| DeviceError::ProtocolError(e.to_string()))?;

        let (client, mut eventloop) = connect(device, &settings);

        let exchange = async {
            client
                .publish(topic.as_str(), QoS::AtLeastOnce, false, body)
                .await
                .map_err(|e| DeviceError::ProtocolError(e.to_string()))?;

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(DeviceError::ProtocolError(format!("{}: {e}", device.id))),
                }
            }
        };

        let outcome = tokio::time::timeout(self.mqtt_timeout, exchange)
            .await
            .map_err(|_| DeviceError::Timeout(format!("{} after {:?}", device.id, self.mqtt_timeout)))?;

        let _ = client.try_disconnect();
        if outcome.is_ok() {
            tracing::debug!(device = %device.id, topic = %topic, "broker acknowledged publish");
        }
        outcome
    }

    /// Subscribe to the state topic and take its retained message
    async fn mqtt_read_retained(
        &self,
        device: &Device,
        settings: &MqttSettings,
        topic: &str,
    ) -> Result<DeviceReport, DeviceError> {
        let (client, mut eventloop) = connect(device, settings);

        let exchange = async {
            client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| DeviceError::ProtocolError(e.to_string()))?;

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == topic => {
                        return Ok(DeviceReport::parse(&publish.payload));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(DeviceError::ProtocolError(format!("{}: {e}", device.id))),
                }
            }
        };

        let outcome = tokio::time::timeout(self.mqtt_timeout, exchange)
            .await
            .map_err(|_| DeviceError::Timeout(format!("{} after {:?}", device.id, self.mqtt_timeout)))?;

        let _ = client.try_disconnect();
        outcome
    }
}

fn mqtt_settings(device: &Device) -> Result<MqttSettings, DeviceError> {
    device
        .mqtt
        .clone()
        .ok_or_else(|| DeviceError::ProtocolError(format!("{} has no mqtt settings", device.id)))
}

fn connect(device: &Device, settings: &MqttSettings) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        format!("capri_{}_{}", device.id, uuid::Uuid::new_v4().simple()),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(5));
    if let Some(auth) = &settings.auth {
        options.set_credentials(auth.username.clone(), auth.password.clone());
    }
    AsyncClient::new(options, 10)
}
