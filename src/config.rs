use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub devices: Vec<Device>,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default)]
    pub store: Store,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Device {{{
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Battery,
    Meter,
}

impl DeviceKind {
    pub fn default_poll_interval(&self) -> Duration {
        match self {
            DeviceKind::Battery => Duration::from_secs(30),
            DeviceKind::Meter => Duration::from_secs(3),
        }
    }

    pub fn default_request_timeout(&self) -> Duration {
        match self {
            DeviceKind::Battery => Duration::from_secs(5),
            DeviceKind::Meter => Duration::from_secs(2),
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Battery => write!(f, "battery"),
            DeviceKind::Meter => write!(f, "meter"),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Device {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub id: String,
    pub kind: DeviceKind,
    pub address: Option<String>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub poll_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub request_timeout: Option<Duration>,

    pub minsoc_correction: Option<bool>,
    pub output_correction_offset: Option<f64>,
}

impl Device {
    pub fn new(id: &str, kind: DeviceKind) -> Self {
        Self {
            enabled: true,
            id: id.to_string(),
            kind,
            address: None,
            poll_interval: None,
            request_timeout: None,
            minsoc_correction: None,
            output_correction_offset: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
            .unwrap_or_else(|| self.kind.default_poll_interval())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
            .unwrap_or_else(|| self.kind.default_request_timeout())
    }

    pub fn minsoc_correction(&self) -> bool {
        self.minsoc_correction == Some(true) // off unless asked for
    }

    pub fn output_correction_offset(&self) -> f64 {
        self.output_correction_offset.unwrap_or(0.0)
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Store {{{
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Store {
    pub file: Option<String>,
    pub database: Option<String>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            file: Some("zendure-state.json".to_string()),
            database: None,
        }
    }
}

impl Store {
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        // a poisoned lock still holds a valid Config; nothing mutates it halfway
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn devices(&self) -> Vec<Device> {
        self.lock().devices.clone()
    }

    pub fn enabled_devices(&self) -> Vec<Device> {
        self.devices().into_iter().filter(|d| d.enabled()).collect()
    }

    pub fn devices_for_message(&self, message: &mqtt::Message) -> Result<Vec<Device>> {
        let (target, _) = message.split_cmd_topic()?;
        let devices = self.enabled_devices();

        match target {
            mqtt::TargetDevice::All => Ok(devices),
            mqtt::TargetDevice::Id(id) => Ok(devices.into_iter().filter(|d| d.id() == id).collect()),
        }
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn store(&self) -> Store {
        self.lock().store.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!(
            "  Devices: {} configured, {} enabled",
            config.devices.len(),
            config.devices.iter().filter(|d| d.enabled).count()
        );
        for (i, dev) in config.devices.iter().enumerate() {
            info!("    Device[{}]:", i);
            info!("      Id: {}", dev.id);
            info!("      Kind: {}", dev.kind);
            info!("      Enabled: {}", dev.enabled);
            info!("      Address: {}", dev.address.clone().unwrap_or_default());
            info!("      Poll Interval: {}s", dev.poll_interval().as_secs());
            info!("      Request Timeout: {}s", dev.request_timeout().as_secs());
            if dev.kind == DeviceKind::Battery {
                info!("      Min SOC Correction: {}", dev.minsoc_correction());
                info!("      Output Correction Offset: {}W", dev.output_correction_offset());
            }
        }

        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
        }

        match (config.store.file(), config.store.database()) {
            (Some(file), None) => info!("  Store: file {}", file),
            (None, Some(url)) => info!("  Store: database {}", url),
            _ => {}
        }
        info!("  Log Level: {}", config.loglevel);

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(anyhow!("config.rs:MQTT host cannot be empty"));
            }
        }

        match (&self.store.file, &self.store.database) {
            (Some(_), Some(_)) => bail!("store: set either file or database, not both"),
            (None, None) => bail!("store: one of file or database is required"),
            (Some(file), None) if file.is_empty() => {
                bail!("store.file cannot be empty")
            }
            (None, Some(db)) => {
                if let Err(e) = url::Url::parse(db) {
                    return Err(anyhow!("config.rs:Invalid database URL: {}", e));
                }
            }
            _ => {}
        }

        let mut seen = std::collections::HashSet::new();
        for (i, dev) in self.devices.iter().enumerate() {
            if dev.id.is_empty() {
                bail!("devices[{}].id cannot be empty", i);
            }
            if dev.id.contains('/') || dev.id == "all" {
                bail!("devices[{}].id {:?} is not usable as an MQTT topic level", i, dev.id);
            }
            if !seen.insert(dev.id.as_str()) {
                bail!("devices[{}].id {} is not unique", i, dev.id);
            }
            if dev.poll_interval().is_zero() {
                bail!("devices[{}].poll_interval must be greater than 0", i);
            }
            if dev.request_timeout().is_zero() {
                return Err(anyhow!("config.rs:Invalid request timeout: 0"));
            }
            if dev.request_timeout() >= dev.poll_interval() {
                bail!(
                    "devices[{}].request_timeout ({}s) must be shorter than poll_interval ({}s)",
                    i,
                    dev.request_timeout().as_secs(),
                    dev.poll_interval().as_secs()
                );
            }
        }

        Ok(())
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: String::new(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
        }
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "zendure".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
devices:
  - id: hub
    kind: battery
    address: 192.168.1.20
  - id: p1
    kind: meter
    poll_interval: 10
"#;

    #[test]
    fn defaults() -> Result<()> {
        let config = Config::from_yaml(MINIMAL)?;

        let hub = &config.devices[0];
        assert!(hub.enabled());
        assert_eq!(hub.poll_interval(), Duration::from_secs(30));
        assert_eq!(hub.request_timeout(), Duration::from_secs(5));
        assert!(!hub.minsoc_correction());
        assert_eq!(hub.output_correction_offset(), 0.0);
        assert_eq!(hub.address(), Some("192.168.1.20"));

        let meter = &config.devices[1];
        assert_eq!(meter.kind(), DeviceKind::Meter);
        assert_eq!(meter.poll_interval(), Duration::from_secs(10));

        assert!(!config.mqtt.enabled());
        assert_eq!(config.store.file(), Some("zendure-state.json"));
        assert_eq!(config.loglevel, "info");

        Ok(())
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = r#"
devices:
  - id: hub
    kind: battery
  - id: hub
    kind: meter
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn rejects_timeout_longer_than_interval() {
        let yaml = r#"
devices:
  - id: p1
    kind: meter
    request_timeout: 5
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn rejects_two_stores() {
        let yaml = r#"
devices: []
store:
  file: state.json
  database: sqlite://state.db
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn corrections() -> Result<()> {
        let yaml = r#"
devices:
  - id: hub
    kind: battery
    minsoc_correction: true
    output_correction_offset: 12.5
"#;
        let config = Config::from_yaml(yaml)?;
        assert!(config.devices[0].minsoc_correction());
        assert_eq!(config.devices[0].output_correction_offset(), 12.5);
        Ok(())
    }
}
