use crate::prelude::*;

use std::sync::{Arc, RwLock};

/// The current network address of one logical device.
///
/// Discovery may move a device to a new address at any time; every request
/// reads the address through this handle so it always goes to the latest one.
/// Clones share the same binding.
#[derive(Clone, Debug)]
pub struct DeviceEndpoint {
    device_id: String,
    address: Arc<RwLock<Option<String>>>,
}

impl DeviceEndpoint {
    pub fn new(device_id: &str, address: Option<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            address: Arc::new(RwLock::new(address)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn address(&self) -> Option<String> {
        self.address
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Rebinds to `address`. Returns true when the address actually changed.
    pub fn set_address(&self, address: &str) -> Result<bool, ConfigurationError> {
        let address = address.trim();
        Self::url_for(address, "/")?;

        let mut current = self.address.write().unwrap_or_else(|e| e.into_inner());
        if current.as_deref() == Some(address) {
            return Ok(false);
        }
        *current = Some(address.to_string());
        Ok(true)
    }

    pub fn report_url(&self) -> Result<url::Url, ConfigurationError> {
        self.url("/properties/report")
    }

    pub fn write_url(&self) -> Result<url::Url, ConfigurationError> {
        self.url("/properties/write")
    }

    fn url(&self, path: &str) -> Result<url::Url, ConfigurationError> {
        match self.address() {
            Some(address) => Self::url_for(&address, path),
            None => Err(ConfigurationError::MissingAddress(self.device_id.clone())),
        }
    }

    fn url_for(address: &str, path: &str) -> Result<url::Url, ConfigurationError> {
        if address.is_empty() || address.contains('/') {
            return Err(ConfigurationError::InvalidAddress(
                address.to_string(),
                "expected host or host:port".to_string(),
            ));
        }
        url::Url::parse(&format!("http://{}{}", address, path))
            .map_err(|e| ConfigurationError::InvalidAddress(address.to_string(), e.to_string()))
    }
}

/// Checks that `ip` is a dotted IPv4 address, as typed in by a user.
pub fn validate_ipv4(ip: &str) -> Result<std::net::Ipv4Addr, ConfigurationError> {
    let cleaned = ip.trim();
    cleaned
        .parse::<std::net::Ipv4Addr>()
        .map_err(|_| ConfigurationError::InvalidAddress(cleaned.to_string(), "Invalid IPv4 address".to_string()))
}
