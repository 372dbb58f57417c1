pub mod availability; // Consecutive-failure tracking per device
pub mod channels;     // Inter-component communication channels
pub mod command;      // Commands received over MQTT
pub mod config;       // Configuration management
pub mod coordinator;  // Routes commands to devices
pub mod corrector;    // Raw readings to published values
pub mod database;     // SQL-backed persistence
pub mod device;       // Per-device poll loop
pub mod endpoint;     // Current network address of a device
pub mod energy;       // Charged/discharged energy meters
pub mod error;        // Error handling and types
pub mod mqtt;         // MQTT client and messaging
pub mod options;      // Command line options parsing
pub mod poll;         // Poll timer and single-flight state
pub mod prelude;      // Common imports and types
pub mod store;        // Persisted per-device fields
pub mod zendure;      // Device HTTP API

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::device::Device;
use crate::mqtt::Mqtt;
use crate::prelude::*;
use crate::store::DeviceStore;
use std::io::Write;

/// Everything that has to be told when the bridge shuts down.
pub struct Components {
    pub coordinator: Coordinator,
    pub mqtt: Mqtt,
    pub devices: Vec<Device>,
}

impl Components {
    /// Stops the poll loops first so nothing new is published, then the
    /// command router and finally MQTT.
    pub async fn stop(&self) {
        info!("Stopping all components...");

        for device in &self.devices {
            device.remove();
        }
        self.coordinator.stop();
        let _ = self.mqtt.stop().await;

        info!("Shutdown complete");
    }
}

fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

/// Main application entry point
pub async fn app() -> Result<()> {
    let options = Options::new();

    if let Some(ip) = options.probe.as_deref() {
        init_logging("info");
        return probe(ip).await;
    }

    let config = match ConfigWrapper::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            bail!("Failed to load config {}: {:?}", options.config_file, err);
        }
    };
    init_logging(&config.loglevel());

    info!("zendure-bridge {} starting with config file: {}", CARGO_PKG_VERSION, options.config_file);

    let channels = Channels::new();

    info!("  Opening store...");
    let store = store::open(&config.store()).await?;

    info!("  Loading devices...");
    let mut devices = Vec::new();
    for device in config.enabled_devices() {
        let device_store = DeviceStore::new(store.clone(), device.id());
        match Device::load(device.clone(), device_store, channels.clone()).await {
            Ok(d) => devices.push(d),
            Err(e) => error!("device {}: failed to load: {:?}", device.id(), e),
        }
    }
    info!("    Loaded {} devices", devices.len());

    info!("  Creating Coordinator...");
    let coordinator = Coordinator::new(config.clone(), channels.clone(), devices.clone());
    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("Coordinator task failed: {}", e);
        }
    });

    info!("  Creating MQTT client...");
    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    for device in &devices {
        device.start();
    }

    info!("Waiting for shutdown signal...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }

    info!("Shutdown signal received, stopping components...");
    let components = Components {
        coordinator,
        mqtt,
        devices,
    };
    components.stop().await;

    if let Err(e) = coordinator_handle.await {
        error!("Error waiting for coordinator task: {}", e);
    }
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for MQTT task: {}", e);
    }

    info!("Application shutdown complete");
    Ok(())
}

async fn probe(ip: &str) -> Result<()> {
    let client = zendure::Client::new(std::time::Duration::from_secs(5))?;
    let info = client.probe(ip).await?;

    info!("found device at {}: {:?}", ip, info);
    println!("{}", serde_json::to_string_pretty(&info)?);
    println!("suggested id: {}", info.suggested_id());

    Ok(())
}
