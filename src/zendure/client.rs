use crate::prelude::*;
use crate::config::DeviceKind;
use crate::endpoint::{validate_ipv4, DeviceEndpoint};
use crate::zendure::report::{DeviceInfo, Report};

use serde::Serialize;
use std::time::Duration;

// a failed write is tried once more, then surfaced
const WRITE_ATTEMPTS: usize = 2;
const PROBE_TIMEOUT_SECS: u64 = 3;

/// Control fields accepted by `/properties/write`. Unset fields are omitted
/// from the request; anything without a typed field goes in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_mode: Option<u8>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Properties {
    /// Power target in watts: negative charges from the grid, anything else
    /// feeds the home.
    pub fn power_target(watts: i32) -> Self {
        if watts < 0 {
            Self {
                ac_mode: Some(1),
                input_limit: Some(watts.unsigned_abs()),
                ..Default::default()
            }
        } else {
            Self {
                ac_mode: Some(2),
                output_limit: Some(watts as u32),
                ..Default::default()
            }
        }
    }

    /// Keeps the device from writing settings to flash on every command.
    pub fn smart_mode() -> Self {
        Self {
            smart_mode: Some(1),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    sn: Option<&'a str>,
    properties: &'a Properties,
}

/// Whatever the device answered to a write; usually an echo of the request.
#[derive(Clone, Debug, PartialEq)]
pub struct Ack(pub serde_json::Value);

#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
}

impl Client {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// GET the status report of whatever `endpoint` currently points at.
    pub async fn fetch(&self, endpoint: &DeviceEndpoint, kind: DeviceKind) -> Result<Report, DeviceError> {
        let url = endpoint.report_url()?;
        trace!("device {}: GET {}", endpoint.device_id(), url);

        let body = self.get(url).await?;
        let now = chrono::Utc::now().timestamp_millis();

        Ok(Report::parse(&body, kind, now)?)
    }

    /// POST `properties` to the device, retrying once on any failure.
    pub async fn send(
        &self,
        endpoint: &DeviceEndpoint,
        serial: Option<&str>,
        properties: &Properties,
    ) -> Result<Ack, DeviceError> {
        let mut last_err = None;

        for attempt in 1..=WRITE_ATTEMPTS {
            // re-read every attempt, the address may have moved in between
            let url = endpoint.write_url()?;
            let request = WriteRequest { sn: serial, properties };
            debug!(
                "device {}: POST {} {} (attempt {}/{})",
                endpoint.device_id(),
                url,
                serde_json::to_string(&request).unwrap_or_default(),
                attempt,
                WRITE_ATTEMPTS
            );

            match self.post(url, &request).await {
                Ok(ack) => {
                    info!("device {}: write acknowledged", endpoint.device_id());
                    return Ok(ack);
                }
                Err(err) => {
                    warn!(
                        "device {}: write failed: {} (attempt {}/{})",
                        endpoint.device_id(),
                        err,
                        attempt,
                        WRITE_ATTEMPTS
                    );
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or(TransportError::Unreachable("no attempt made".to_string()));
        error!("device {}: giving up on write: {}", endpoint.device_id(), err);
        Err(err.into())
    }

    /// Asks a hand-typed IPv4 address what it is, with a short timeout so
    /// pairing never hangs on a dead address.
    pub async fn probe(&self, ip: &str) -> Result<DeviceInfo> {
        let ip = validate_ipv4(ip)?;
        let url = url::Url::parse(&format!("http://{}/properties/report", ip))?;

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| anyhow!("Device not found at {}: {}", ip, TransportError::from(e)))?;
        if !response.status().is_success() {
            bail!("Device not found at {}: HTTP {}", ip, response.status().as_u16());
        }

        let body = response.text().await.map_err(TransportError::from)?;
        Ok(DeviceInfo::parse(&body)?)
    }

    async fn get(&self, url: url::Url) -> Result<String, TransportError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    async fn post(&self, url: url::Url, request: &WriteRequest<'_>) -> Result<Ack, TransportError> {
        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Ack(serde_json::Value::Null));
        }
        serde_json::from_str(&body)
            .map(Ack)
            .map_err(|e| TransportError::MalformedBody(e.to_string()))
    }
}
